use super::{Backend, WorkerUnit};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::panic_handler::PanicInfo;
use crate::executor::{LocalExecutor, Registry, Worker, WorkerExit, WorkerId};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Runs every worker on its own OS thread, executing tasks through a
/// shared [`Registry`].
#[derive(Debug, Clone)]
pub struct ThreadBackend {
    registry: Arc<Registry>,
}

impl ThreadBackend {
    pub fn new(registry: Registry) -> Self {
        Self::shared(Arc::new(registry))
    }

    pub fn shared(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::new(Registry::with_builtins())
    }
}

impl Backend for ThreadBackend {
    type Unit = ThreadUnit;

    fn spawn(&self, worker: Worker, config: &PoolConfig) -> Result<ThreadUnit> {
        let id = worker.id();
        let name = format!("{}-{}", config.thread_name_prefix, id);
        let mut executor = LocalExecutor::new(self.registry.clone(), config.panic_strategy);

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || worker.run(&mut executor))?;
        debug!(worker = id, thread = %name, "spawned worker thread");

        Ok(ThreadUnit {
            id,
            name,
            handle: Some(handle),
        })
    }
}

#[derive(Debug)]
pub struct ThreadUnit {
    id: WorkerId,
    name: String,
    handle: Option<JoinHandle<WorkerExit>>,
}

impl WorkerUnit for ThreadUnit {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn join(&mut self) -> Result<WorkerExit> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::protocol(format!("{} already joined", self.name)))?;

        handle
            .join()
            .map_err(|payload| Error::WorkerPanic(PanicInfo::from_payload(payload).message))
    }

    fn terminate(&mut self) -> Result<()> {
        Err(Error::unsupported(
            "threads cannot be killed; send a poison pill instead",
        ))
    }
}
