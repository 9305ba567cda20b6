//! Collector for finished task outcomes.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::{Duration, Instant};

/// Unbounded multi-producer collector; items come out in the order they
/// were pushed, which for a worker pool is completion order.
pub struct ResultSink<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> ResultSink<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, item: T) {
        // both ends live in `self`, so the channel cannot be disconnected
        let _ = self.tx.send(item);
    }

    /// Blocks until `n` items have been received.
    pub fn take(&self, n: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.rx.recv() {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }
        out
    }

    /// Receives up to `n` items, giving up once `timeout` elapses.
    ///
    /// A short result means some producer never delivered; callers use the
    /// shortfall to detect lost work.
    pub fn take_timeout(&self, n: usize, timeout: Duration) -> Vec<T> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.rx.recv_deadline(deadline) {
                Ok(item) => out.push(item),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out
    }

    /// Takes whatever is currently available without blocking.
    pub fn try_drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for ResultSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResultSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink").field("len", &self.len()).finish()
    }
}
