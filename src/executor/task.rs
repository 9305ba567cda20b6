//! Task values and the outcomes they produce.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unit of work: the name of an operation and its arguments.
///
/// Tasks are plain values. They own their payload and can be moved to
/// another thread or serialized to another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub operation: String,
    pub payload: Value,
}

impl Task {
    /// Creates a task with a fresh id.
    pub fn new<S: Into<String>>(operation: S, payload: Value) -> Self {
        Self::with_id(TaskId::next(), operation, payload)
    }

    /// Creates a task with a caller-chosen id.
    pub fn with_id<S: Into<String>>(id: TaskId, operation: S, payload: Value) -> Self {
        Self {
            id,
            operation: operation.into(),
            payload,
        }
    }

    /// Serializes `args` into the payload of a new task.
    pub fn from_args<S, A>(operation: S, args: &A) -> crate::Result<Self>
    where
        S: Into<String>,
        A: Serialize + ?Sized,
    {
        Ok(Self::new(operation, serde_json::to_value(args)?))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.payload)
    }
}

/// Item carried by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Job {
    /// Tells the worker that dequeues it to stop.
    Pill,
    Work(Task),
}

impl Job {
    pub fn is_pill(&self) -> bool {
        matches!(self, Job::Pill)
    }
}

impl From<Task> for Job {
    fn from(task: Task) -> Self {
        Job::Work(task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    UnknownOperation,
    InvalidPayload,
    Failed,
    Panicked,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorKind::UnknownOperation => "unknown operation",
            TaskErrorKind::InvalidPayload => "invalid payload",
            TaskErrorKind::Failed => "failed",
            TaskErrorKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Why a single task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new<S: Into<String>>(kind: TaskErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::Failed, message)
    }

    pub fn invalid_payload<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::InvalidPayload, message)
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(
            TaskErrorKind::UnknownOperation,
            format!("no handler registered for {operation:?}"),
        )
    }
}

/// What running a task body yields.
pub type TaskResult = std::result::Result<Value, TaskError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success(Value),
    Failure(TaskError),
}

/// Recorded result of one executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub operation: String,
    /// Index of the worker that ran the task.
    pub worker: usize,
    pub status: OutcomeStatus,
}

impl TaskOutcome {
    pub fn new(task: &Task, worker: usize, result: TaskResult) -> Self {
        let status = match result {
            Ok(value) => OutcomeStatus::Success(value),
            Err(err) => OutcomeStatus::Failure(err),
        };
        Self {
            task_id: task.id,
            operation: task.operation.clone(),
            worker,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.status {
            OutcomeStatus::Success(v) => Some(v),
            OutcomeStatus::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.status {
            OutcomeStatus::Success(_) => None,
            OutcomeStatus::Failure(e) => Some(e),
        }
    }

    pub fn into_result(self) -> crate::Result<Value> {
        match self.status {
            OutcomeStatus::Success(v) => Ok(v),
            OutcomeStatus::Failure(e) => Err(e.into()),
        }
    }
}
