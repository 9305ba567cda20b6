use super::registry::Registry;
use super::task::{Job, Task, TaskOutcome};
use super::worker::{Worker, WorkerExit, WorkerId, WorkerStats};
use crate::backend::{Backend, ThreadBackend, WorkerUnit};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::queue::TaskQueue;
use crate::sink::ResultSink;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// how often shutdown re-checks worker liveness while the queue drains
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    /// Poison pills are queued and no new tasks are admitted.
    Draining,
    Stopped,
}

/// Cloneable handle for feeding tasks into a pool from other threads.
#[derive(Debug, Clone)]
pub struct Submitter {
    queue: Arc<TaskQueue<Job>>,
}

impl Submitter {
    pub fn submit(&self, task: Task) -> Result<()> {
        self.queue.enqueue(Job::Work(task))
    }
}

/// A fixed set of workers sharing one task queue and one result sink.
///
/// ```no_run
/// use serde_json::json;
/// use taskgate::prelude::*;
///
/// let config = PoolConfig::builder().workers(2).build()?;
/// let mut pool = WorkerPool::threaded(config, Registry::with_builtins())?;
///
/// pool.submit(Task::new("mul", json!([2, 3])))?;
/// pool.shutdown()?;
///
/// let outcomes = pool.drain_and_collect(1)?;
/// assert_eq!(outcomes[0].value(), Some(&json!(6)));
/// # Ok::<(), taskgate::Error>(())
/// ```
pub struct WorkerPool<B: Backend = ThreadBackend> {
    config: PoolConfig,
    backend: B,
    queue: Arc<TaskQueue<Job>>,
    sink: Arc<ResultSink<TaskOutcome>>,
    units: Vec<B::Unit>,
    stats: Vec<Arc<WorkerStats>>,
    state: PoolState,
}

impl WorkerPool<ThreadBackend> {
    /// Starts `config.workers` threads running operations from `registry`.
    pub fn threaded(config: PoolConfig, registry: Registry) -> Result<Self> {
        Self::launch(config, ThreadBackend::new(registry))
    }
}

impl<B: Backend> WorkerPool<B> {
    /// Creates a pool in the [`PoolState::Created`] state.
    pub fn new(config: PoolConfig, backend: B) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            queue: Arc::new(TaskQueue::with_capacity(config.queue_capacity)),
            sink: Arc::new(ResultSink::new()),
            units: Vec::new(),
            stats: Vec::new(),
            state: PoolState::Created,
            config,
            backend,
        })
    }

    /// Creates a pool and starts `config.workers` workers.
    pub fn launch(config: PoolConfig, backend: B) -> Result<Self> {
        let workers = config.workers;
        let mut pool = Self::new(config, backend)?;
        pool.start(workers)?;
        Ok(pool)
    }

    /// Spawns `n` workers.
    pub fn start(&mut self, n: usize) -> Result<()> {
        if n < 1 {
            return Err(Error::InvalidPoolSize(n));
        }
        if self.state != PoolState::Created {
            return Err(Error::protocol(format!(
                "start called on a {:?} pool",
                self.state
            )));
        }

        for id in 0..n {
            let worker = Worker::new(id, &self.config.name, self.queue.clone(), self.sink.clone());
            let stats = worker.stats();

            match self.backend.spawn(worker, &self.config) {
                Ok(unit) => {
                    self.units.push(unit);
                    self.stats.push(stats);
                }
                Err(e) => {
                    error!(pool = %self.config.name, worker = id, error = %e, "failed to spawn worker");
                    self.abort_start();
                    return Err(e);
                }
            }
        }

        self.state = PoolState::Running;
        info!(pool = %self.config.name, workers = n, "worker pool started");
        Ok(())
    }

    // Stops the workers that did come up before a failed spawn.
    fn abort_start(&mut self) {
        self.queue.close_with((0..self.units.len()).map(|_| Job::Pill));
        self.reap();
        self.state = PoolState::Stopped;
    }

    pub fn submit(&self, task: Task) -> Result<()> {
        match self.state {
            PoolState::Created => Err(Error::protocol("submit called before start")),
            PoolState::Running => self.queue.enqueue(Job::Work(task)),
            PoolState::Draining | PoolState::Stopped => Err(Error::QueueClosed),
        }
    }

    /// Submits every task in order, stopping at the first error.
    ///
    /// Returns how many tasks were submitted.
    pub fn submit_many<I>(&self, tasks: I) -> Result<usize>
    where
        I: IntoIterator<Item = Task>,
    {
        let mut count = 0;
        for task in tasks {
            self.submit(task)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn submitter(&self) -> Result<Submitter> {
        if self.state == PoolState::Created {
            return Err(Error::protocol("submitter requested before start"));
        }
        Ok(Submitter {
            queue: self.queue.clone(),
        })
    }

    /// Sends one poison pill per live worker, waits for the queue to drain
    /// and joins every worker.
    ///
    /// Calling it more than once is a [`Error::ProtocolViolation`].
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            PoolState::Running => {}
            PoolState::Created => return Err(Error::protocol("shutdown called before start")),
            PoolState::Draining | PoolState::Stopped => {
                return Err(Error::protocol("shutdown called twice"))
            }
        }

        self.state = PoolState::Draining;
        let live = self.units.iter().filter(|u| u.is_alive()).count();
        info!(pool = %self.config.name, pills = live, "shutting down worker pool");

        // pills go in behind the last admitted task in the same critical
        // section that closes the queue
        self.queue.close_with((0..live).map(|_| Job::Pill));

        self.drain()?;

        let exits = self.reap();
        let lost = exits
            .iter()
            .filter(|e| !matches!(e, Ok(WorkerExit::Drained)))
            .count();
        self.state = PoolState::Stopped;

        if lost > 0 {
            warn!(pool = %self.config.name, lost, "some workers did not drain cleanly");
        }
        info!(
            pool = %self.config.name,
            executed = self.executed(),
            "worker pool stopped"
        );
        Ok(())
    }

    // Waits for the unfinished count to hit zero. Gives up early when no
    // worker is left alive to acknowledge what remains.
    fn drain(&self) -> Result<()> {
        let deadline = self.config.shutdown_timeout.map(|t| Instant::now() + t);

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        warn!(
                            pool = %self.config.name,
                            unfinished = self.queue.unfinished(),
                            "shutdown timeout reached"
                        );
                        return Err(Error::ShutdownTimeout);
                    }
                    left.min(DRAIN_POLL)
                }
                None => DRAIN_POLL,
            };

            if self.queue.join_timeout(wait) {
                debug!(pool = %self.config.name, "task queue drained");
                return Ok(());
            }

            if !self.units.iter().any(|u| u.is_alive()) {
                warn!(
                    pool = %self.config.name,
                    unfinished = self.queue.unfinished(),
                    "no live workers left; abandoning unacknowledged tasks"
                );
                return Ok(());
            }
        }
    }

    // Joins every worker unit that has not been joined yet.
    fn reap(&mut self) -> Vec<Result<WorkerExit>> {
        let mut exits = Vec::with_capacity(self.units.len());
        for unit in &mut self.units {
            let exit = unit.join();
            match &exit {
                Ok(exit) => debug!(worker = unit.id(), ?exit, "worker joined"),
                Err(Error::ProtocolViolation(_)) => {}
                Err(e) => error!(worker = unit.id(), error = %e, "worker failed"),
            }
            exits.push(exit);
        }
        exits
    }

    /// Blocks until `n` outcomes are available and returns them in
    /// completion order.
    pub fn collect(&self, n: usize) -> Vec<TaskOutcome> {
        self.sink.take(n)
    }

    /// Like [`WorkerPool::collect`], but may return fewer than `n` outcomes
    /// once `timeout` elapses.
    pub fn collect_timeout(&self, n: usize, timeout: Duration) -> Vec<TaskOutcome> {
        self.sink.take_timeout(n, timeout)
    }

    /// Collects `n` outcomes from a pool that has been shut down.
    pub fn drain_and_collect(&self, n: usize) -> Result<Vec<TaskOutcome>> {
        if self.state != PoolState::Stopped {
            return Err(Error::protocol(format!(
                "drain_and_collect called on a {:?} pool",
                self.state
            )));
        }

        let available = self.sink.len();
        if available < n {
            // every worker is gone, so nothing else will arrive
            warn!(pool = %self.config.name, expected = n, available, "outcome shortfall");
            return Ok(self.sink.take(available));
        }
        Ok(self.sink.take(n))
    }

    /// Kills worker `id` out-of-band, if the backing supports it.
    pub fn terminate_worker(&mut self, id: WorkerId) -> Result<()> {
        let unit = self
            .units
            .get_mut(id)
            .ok_or_else(|| Error::protocol(format!("no worker {id}")))?;
        warn!(pool = %self.config.name, worker = id, "terminating worker");
        unit.terminate()
    }

    pub fn is_alive(&self, id: WorkerId) -> Option<bool> {
        self.units.get(id).map(|u| u.is_alive())
    }

    /// Exit code reported by worker `id` after it was joined.
    pub fn exit_code(&self, id: WorkerId) -> Option<i32> {
        self.units.get(id).and_then(|u| u.exit_code())
    }

    pub fn unit(&self, id: WorkerId) -> Option<&B::Unit> {
        self.units.get(id)
    }

    pub fn alive_workers(&self) -> usize {
        self.units.iter().filter(|u| u.is_alive()).count()
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn worker_count(&self) -> usize {
        self.units.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue<Job>> {
        &self.queue
    }

    pub fn sink(&self) -> &Arc<ResultSink<TaskOutcome>> {
        &self.sink
    }

    pub fn worker_stats(&self, id: WorkerId) -> Option<&WorkerStats> {
        self.stats.get(id).map(|s| s.as_ref())
    }

    /// Tasks executed so far across all workers.
    pub fn executed(&self) -> u64 {
        self.stats.iter().map(|s| s.executed()).sum()
    }
}

impl<B: Backend> Drop for WorkerPool<B> {
    fn drop(&mut self) {
        if self.state == PoolState::Running {
            let live = self.units.iter().filter(|u| u.is_alive()).count();
            self.queue.close_with((0..live).map(|_| Job::Pill));
        }
        if matches!(self.state, PoolState::Running | PoolState::Draining) {
            self.reap();
            self.state = PoolState::Stopped;
        }
    }
}

impl<B: Backend> std::fmt::Debug for WorkerPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("workers", &self.units.len())
            .field("queue", &self.queue)
            .finish()
    }
}
