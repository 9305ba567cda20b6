use crate::executor::TaskError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("queue is closed to new tasks")]
    QueueClosed,

    #[error("queue is empty")]
    Empty,

    #[error("invalid pool size {0}: need at least one worker")]
    InvalidPoolSize(usize),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("task failed: {0}")]
    TaskExecution(#[from] TaskError),

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Error::Backend(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Whether the caller can keep going after this error.
    ///
    /// Only [`Error::QueueClosed`] and [`Error::Empty`] are expected during
    /// normal operation; everything else signals misuse or a broken worker.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::QueueClosed | Error::Empty)
    }
}
