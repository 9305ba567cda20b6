//! taskgate - bounded worker pools with poison-pill shutdown
//!
//! A fixed set of workers pulls [`Task`]s from a shared [`TaskQueue`],
//! runs them, and pushes one [`TaskOutcome`] per task into a
//! [`ResultSink`]. Shutdown sends exactly one poison pill per worker and
//! waits until every task has been acknowledged.
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use taskgate::prelude::*;
//!
//! let config = PoolConfig::builder().workers(2).build()?;
//! let mut pool = WorkerPool::threaded(config, Registry::with_builtins())?;
//!
//! pool.submit_many([
//!     Task::new("mul", json!([2, 3])),
//!     Task::new("mul", json!([4, 4])),
//! ])?;
//! pool.shutdown()?;
//!
//! for outcome in pool.drain_and_collect(2)? {
//!     println!("{} -> {:?}", outcome.task_id, outcome.status);
//! }
//! # Ok::<(), taskgate::Error>(())
//! ```
//!
//! # Features
//!
//! - **Acknowledged queue**: `join` waits for processing, not just dequeue
//! - **Contained failures**: errors and panics in task bodies become
//!   `Failure` outcomes, never dead workers
//! - **Pluggable backings**: OS threads, or child processes speaking JSON
//!   lines (`process` feature)
//! - **Stage gate**: one-shot broadcast rendezvous between work stages

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod queue;
pub mod sink;
pub mod sync;

// Re-export key types at crate root
pub use backend::{Backend, ThreadBackend, WorkerUnit};
pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{Error, Result};
pub use executor::{
    Job, OutcomeStatus, PoolState, Registry, Task, TaskError, TaskErrorKind, TaskId, TaskOutcome,
    WorkerPool,
};
pub use queue::TaskQueue;
pub use sink::ResultSink;
pub use sync::StageGate;

#[cfg(feature = "process")]
pub use backend::ProcessBackend;
