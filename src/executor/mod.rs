//! Task execution infrastructure.
//!
//! This module provides the task model, the worker loop and the pool that
//! owns a fixed set of workers.

pub mod panic_handler;
pub mod pool;
pub mod registry;
pub mod task;
pub mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy};
pub use pool::{PoolState, WorkerPool};
pub use registry::Registry;
pub use task::{Job, OutcomeStatus, Task, TaskError, TaskErrorKind, TaskId, TaskOutcome, TaskResult};
pub use worker::{Executor, LocalExecutor, Worker, WorkerExit, WorkerId, WorkerStats};
