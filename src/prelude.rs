pub use crate::backend::{Backend, ThreadBackend, WorkerUnit};
pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::{
    Job, OutcomeStatus, PanicStrategy, PoolState, Registry, Task, TaskError, TaskErrorKind,
    TaskId, TaskOutcome, WorkerPool,
};
pub use crate::queue::TaskQueue;
pub use crate::sink::ResultSink;
pub use crate::sync::StageGate;

#[cfg(feature = "process")]
pub use crate::backend::ProcessBackend;
