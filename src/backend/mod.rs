//! Concurrent worker backings.
//!
//! The pool never touches threads or processes directly. It asks a
//! [`Backend`] to turn a [`Worker`] into a running [`WorkerUnit`] and then
//! only uses the unit's lifecycle operations.

use crate::config::PoolConfig;
use crate::error::Result;
use crate::executor::{Worker, WorkerExit, WorkerId};

pub mod thread;
pub use self::thread::{ThreadBackend, ThreadUnit};

#[cfg(feature = "process")]
pub mod process;
#[cfg(feature = "process")]
pub use self::process::{ProcessBackend, ProcessUnit};

/// Something that can run a worker loop concurrently with the caller.
pub trait Backend: Send + Sync {
    type Unit: WorkerUnit;

    /// Starts running `worker` and returns a handle to it.
    fn spawn(&self, worker: Worker, config: &PoolConfig) -> Result<Self::Unit>;
}

/// Handle to one running worker.
pub trait WorkerUnit: Send {
    fn id(&self) -> WorkerId;

    fn name(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Waits for the worker to finish. Can only be called once.
    fn join(&mut self) -> Result<WorkerExit>;

    /// Exit status of a joined worker process. `None` for backings without
    /// one, before `join`, or when the process was killed by a signal.
    fn exit_code(&self) -> Option<i32> {
        None
    }

    /// Stops the worker out-of-band. A task it was running is never
    /// acknowledged and produces no outcome. The unit still has to be
    /// joined afterwards.
    fn terminate(&mut self) -> Result<()>;
}
