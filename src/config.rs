use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::env;
use std::time::Duration;

/// Environment variable overriding the number of workers.
pub const TASKGATE_WORKERS: &str = "TASKGATE_WORKERS";

const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Label attached to every log record emitted by the pool and its workers.
    pub name: String,
    pub workers: usize,
    /// `None` means the task queue never blocks producers.
    pub queue_capacity: Option<usize>,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub panic_strategy: PanicStrategy,
    /// Upper bound on waiting for the queue to drain during shutdown.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "taskgate".to_string(),
            workers: num_cpus::get().max(1),
            queue_capacity: None,
            thread_name_prefix: "taskgate-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            panic_strategy: PanicStrategy::default(),
            shutdown_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Default configuration with the worker count taken from
    /// `TASKGATE_WORKERS` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = workers_from_env()? {
            config.workers = n;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidPoolSize(0));
        }
        if self.workers > MAX_WORKERS {
            return Err(Error::config(format!(
                "workers too large (max {MAX_WORKERS})"
            )));
        }
        if self.queue_capacity == Some(0) {
            return Err(Error::config("queue_capacity must be > 0"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }
        Ok(())
    }
}

fn workers_from_env() -> Result<Option<usize>> {
    match env::var(TASKGATE_WORKERS) {
        Ok(value) => parse_workers(&value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_workers(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::config(format!(
            "invalid value {value:?} in {TASKGATE_WORKERS}; must be a natural number"
        ))),
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.config.queue_capacity = None;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
