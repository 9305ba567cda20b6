// worker loop
use super::panic_handler::{PanicHandler, PanicStrategy};
use super::registry::Registry;
use super::task::{Job, Task, TaskOutcome, TaskResult};
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::sink::ResultSink;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

pub type WorkerId = usize;

// how often an idle worker with a halt flag re-checks it and its executor
const HALT_POLL: Duration = Duration::from_millis(20);

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub executed: AtomicU64,
    pub failed: AtomicU64,
}

impl WorkerStats {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Runs task bodies on behalf of a worker.
///
/// `Err` means the executor itself is gone (e.g. its child process died),
/// not that the task failed. Task failures travel inside [`TaskResult`].
pub trait Executor: Send {
    fn execute(&mut self, task: &Task) -> Result<TaskResult>;

    /// Whatever runs the tasks is still there. Polled between tasks by
    /// workers that have a halt flag.
    fn is_available(&mut self) -> bool {
        true
    }
}

/// Executes tasks on the calling thread through a [`Registry`].
#[derive(Debug)]
pub struct LocalExecutor {
    registry: Arc<Registry>,
    panics: PanicHandler,
}

impl LocalExecutor {
    pub fn new(registry: Arc<Registry>, strategy: PanicStrategy) -> Self {
        Self {
            registry,
            panics: PanicHandler::new(strategy),
        }
    }
}

impl Executor for LocalExecutor {
    fn execute(&mut self, task: &Task) -> Result<TaskResult> {
        let registry = &self.registry;
        let result = self
            .panics
            .execute(|| registry.execute(task))
            .unwrap_or_else(|info| Err(info.into()));
        Ok(result)
    }
}

/// How a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Consumed a poison pill.
    Drained,
    /// Lost its executor mid-task; that task was never acknowledged.
    Lost(String),
    /// Stopped by its halt flag before taking more work.
    Terminated,
}

pub struct Worker {
    id: WorkerId,
    pool: String,
    queue: Arc<TaskQueue<Job>>,
    sink: Arc<ResultSink<TaskOutcome>>,
    stats: Arc<WorkerStats>,
    halt: Option<Arc<AtomicBool>>,
}

impl Worker {
    pub fn new<S: Into<String>>(
        id: WorkerId,
        pool: S,
        queue: Arc<TaskQueue<Job>>,
        sink: Arc<ResultSink<TaskOutcome>>,
    ) -> Self {
        Self {
            id,
            pool: pool.into(),
            queue,
            sink,
            stats: Arc::new(WorkerStats::default()),
            halt: None,
        }
    }

    /// Makes the worker stop taking tasks once `halt` is set.
    ///
    /// Used by backings whose units can be killed from outside; an idle
    /// worker polls the flag instead of blocking forever in `dequeue`.
    pub fn with_halt(mut self, halt: Arc<AtomicBool>) -> Self {
        self.halt = Some(halt);
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    // main loop
    pub fn run<E: Executor + ?Sized>(&self, executor: &mut E) -> WorkerExit {
        let span = info_span!("worker", pool = %self.pool, worker = self.id);
        let _enter = span.enter();
        debug!("worker started");

        loop {
            let job = match self.next_job(executor) {
                Ok(job) => job,
                Err(exit) => {
                    info!(?exit, "stopped while idle");
                    return exit;
                }
            };

            let task = match job {
                Job::Pill => {
                    self.acknowledge();
                    info!(
                        executed = self.stats.executed(),
                        failed = self.stats.failed(),
                        "poison pill received, exiting"
                    );
                    return WorkerExit::Drained;
                }
                Job::Work(task) => task,
            };

            let start = Instant::now();
            let result = match executor.execute(&task) {
                Ok(result) => result,
                Err(e) => {
                    error!(task = %task.id, error = %e, "executor lost, abandoning task");
                    return WorkerExit::Lost(e.to_string());
                }
            };

            self.stats.executed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = &result {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task = %task.id, operation = %task.operation, error = %e, "task failed");
            } else {
                debug!(
                    task = %task.id,
                    operation = %task.operation,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "task done"
                );
            }

            let outcome = TaskOutcome::new(&task, self.id, result);
            self.acknowledge();
            self.sink.push(outcome);
        }
    }

    fn halted(&self) -> bool {
        self.halt.as_ref().is_some_and(|h| h.load(Ordering::Acquire))
    }

    fn next_job<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
    ) -> std::result::Result<Job, WorkerExit> {
        if self.halt.is_none() {
            return Ok(self.queue.dequeue());
        }
        loop {
            if self.halted() {
                return Err(WorkerExit::Terminated);
            }
            if !executor.is_available() {
                return Err(WorkerExit::Lost("executor went away while idle".into()));
            }
            if let Ok(job) = self.queue.dequeue_timeout(HALT_POLL) {
                return Ok(job);
            }
        }
    }

    fn acknowledge(&self) {
        // only reachable through a bookkeeping bug, never through task code
        if let Err(e) = self.queue.acknowledge() {
            error!(error = %e, "acknowledge rejected");
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::OutcomeStatus;
    use crate::Error;
    use serde_json::json;
    use std::thread;

    fn setup() -> (Arc<TaskQueue<Job>>, Arc<ResultSink<TaskOutcome>>) {
        (Arc::new(TaskQueue::unbounded()), Arc::new(ResultSink::new()))
    }

    fn local() -> LocalExecutor {
        LocalExecutor::new(Arc::new(Registry::with_builtins()), PanicStrategy::Isolate)
    }

    #[test]
    fn test_worker_drains_until_pill() {
        let (queue, sink) = setup();
        queue.enqueue(Task::new("mul", json!([2, 3])).into()).unwrap();
        queue.enqueue(Task::new("add", json!([2, 3])).into()).unwrap();
        queue.enqueue(Job::Pill).unwrap();

        let worker = Worker::new(0, "test", queue.clone(), sink.clone());
        assert_eq!(worker.run(&mut local()), WorkerExit::Drained);

        assert_eq!(queue.unfinished(), 0);
        let values: Vec<_> = sink.try_drain().into_iter().map(|o| o.status).collect();
        assert_eq!(
            values,
            vec![OutcomeStatus::Success(json!(6)), OutcomeStatus::Success(json!(5))]
        );
        assert_eq!(worker.stats().executed(), 2);
    }

    #[test]
    fn test_failure_does_not_stop_worker() {
        let (queue, sink) = setup();
        let mut registry = Registry::with_builtins();
        registry.register("explode", |_| panic!("kaboom"));
        let mut executor = LocalExecutor::new(Arc::new(registry), PanicStrategy::Isolate);

        queue.enqueue(Task::new("explode", json!(null)).into()).unwrap();
        queue.enqueue(Task::new("fail", json!("nope")).into()).unwrap();
        queue.enqueue(Task::new("mul", json!([4, 4])).into()).unwrap();
        queue.enqueue(Job::Pill).unwrap();

        let worker = Worker::new(3, "test", queue.clone(), sink.clone());
        assert_eq!(worker.run(&mut executor), WorkerExit::Drained);

        let outcomes = sink.try_drain();
        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert_eq!(outcomes[2].value(), Some(&json!(16)));
        assert!(outcomes.iter().all(|o| o.worker == 3));
        assert_eq!(worker.stats().failed(), 2);
    }

    struct DeadExecutor;

    impl Executor for DeadExecutor {
        fn execute(&mut self, _task: &Task) -> Result<TaskResult> {
            Err(Error::backend("child exited"))
        }
    }

    #[test]
    fn test_lost_executor_skips_acknowledge() {
        let (queue, sink) = setup();
        queue.enqueue(Task::new("echo", json!(1)).into()).unwrap();

        let worker = Worker::new(0, "test", queue.clone(), sink.clone());
        let exit = worker.run(&mut DeadExecutor);

        assert!(matches!(exit, WorkerExit::Lost(_)));
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.unfinished(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_halt_stops_idle_worker() {
        let (queue, sink) = setup();
        let halt = Arc::new(AtomicBool::new(false));
        let worker = Worker::new(0, "test", queue.clone(), sink).with_halt(halt.clone());
        let handle = thread::spawn(move || worker.run(&mut local()));

        thread::sleep(Duration::from_millis(50));
        halt.store(true, Ordering::Release);

        assert_eq!(handle.join().unwrap(), WorkerExit::Terminated);
        queue.enqueue(Job::Pill).unwrap();
        assert_eq!(queue.unfinished(), 1);
    }

    struct GoneExecutor;

    impl Executor for GoneExecutor {
        fn execute(&mut self, _task: &Task) -> Result<TaskResult> {
            unreachable!("an unavailable executor is never handed a task")
        }

        fn is_available(&mut self) -> bool {
            false
        }
    }

    #[test]
    fn test_unavailable_executor_stops_idle_worker() {
        let (queue, sink) = setup();
        let worker = Worker::new(0, "test", queue.clone(), sink.clone())
            .with_halt(Arc::new(AtomicBool::new(false)));
        queue.enqueue(Job::Pill).unwrap();

        assert!(matches!(worker.run(&mut GoneExecutor), WorkerExit::Lost(_)));
        // the pill is left for a live worker
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_workers_share_queue() {
        let (queue, sink) = setup();
        let handles: Vec<_> = (0..3)
            .map(|id| {
                let worker = Worker::new(id, "test", queue.clone(), sink.clone());
                thread::spawn(move || worker.run(&mut local()))
            })
            .collect();

        for i in 0..30 {
            queue.enqueue(Task::new("add", json!([i, 1])).into()).unwrap();
        }
        for _ in 0..3 {
            queue.enqueue(Job::Pill).unwrap();
        }

        queue.join();
        for h in handles {
            assert_eq!(h.join().unwrap(), WorkerExit::Drained);
        }
        assert_eq!(sink.take(30).len(), 30);
    }
}
