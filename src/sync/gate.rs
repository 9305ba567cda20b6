//! Two-stage rendezvous point.
//!
//! One stage-1 participant calls [`StageGate::signal`] when its work is
//! done; any number of stage-2 participants block in
//! [`StageGate::await_stage`] until then. The state is checked under the
//! lock before waiting, so a participant arriving after the signal passes
//! straight through.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Signaled,
}

#[derive(Debug)]
pub struct StageGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl StageGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
            cond: Condvar::new(),
        }
    }

    /// Opens the gate and wakes every waiter.
    ///
    /// Returns `true` if this call opened it; signaling an open gate is a
    /// no-op.
    pub fn signal(&self) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Signaled {
            return false;
        }
        *state = GateState::Signaled;
        let woken = self.cond.notify_all();
        trace!(woken, "stage gate signaled");
        true
    }

    /// Blocks until the gate has been signaled.
    pub fn await_stage(&self) {
        let mut state = self.state.lock();
        while *state == GateState::Idle {
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until the gate is signaled or `timeout` elapses. Returns
    /// whether the gate is open.
    pub fn await_stage_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state == GateState::Idle {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == GateState::Signaled
    }

    pub fn is_signaled(&self) -> bool {
        *self.state.lock() == GateState::Signaled
    }

    pub fn state(&self) -> GateState {
        *self.state.lock()
    }
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}
