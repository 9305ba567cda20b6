//! Child-process worker backing.
//!
//! Each unit is a child process plus a relay thread in the parent. The
//! relay runs the ordinary worker loop against the shared queue and ships
//! every task to the child as one JSON line on its stdin; the child answers
//! with one [`Reply`] line on its stdout. A [`Job::Pill`] line tells the
//! child to exit.
//!
//! [`serve`] is the child side of the protocol; the `taskgate-worker`
//! binary wraps it around the builtin registry.

use super::{Backend, WorkerUnit};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::panic_handler::PanicInfo;
use crate::executor::{
    Executor, Job, PanicHandler, PanicStrategy, Registry, Task, TaskId, TaskResult, Worker,
    WorkerExit, WorkerId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Answer to one task, written by the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub task_id: TaskId,
    pub result: TaskResult,
}

// Serializes like `Job` without cloning the task.
#[derive(Serialize)]
enum JobRef<'a> {
    Pill,
    Work(&'a Task),
}

/// Spawns one `program` process per worker.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessBackend {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env<K: Into<OsString>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl Backend for ProcessBackend {
    type Unit = ProcessUnit;

    fn spawn(&self, worker: Worker, config: &PoolConfig) -> Result<ProcessUnit> {
        let id = worker.id();
        let name = format!("{}-{}", config.thread_name_prefix, id);

        let mut child = self.command().spawn()?;
        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::backend("child process has no stdio pipes"));
            }
        };

        let child = Arc::new(Mutex::new(child));
        let halt = Arc::new(AtomicBool::new(false));
        let worker = worker.with_halt(halt.clone());
        let mut executor = RemoteExecutor::new(child.clone(), stdin, stdout);

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let spawned = builder.spawn(move || {
            let exit = worker.run(&mut executor);
            if exit == WorkerExit::Drained {
                if let Err(e) = executor.finish() {
                    warn!(error = %e, "failed to pass poison pill to child");
                }
            }
            exit
        });

        let relay = match spawned {
            Ok(relay) => relay,
            Err(e) => {
                let mut child = child.lock();
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };
        debug!(worker = id, pid, program = %self.program.display(), "spawned worker process");

        Ok(ProcessUnit {
            id,
            name,
            pid,
            child,
            relay: Some(relay),
            halt,
            exit_code: None,
        })
    }
}

/// Forwards tasks to a child over its stdio pipes.
#[derive(Debug)]
pub struct RemoteExecutor {
    child: Arc<Mutex<Child>>,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl RemoteExecutor {
    fn new(child: Arc<Mutex<Child>>, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            line: String::new(),
        }
    }

    fn send(&mut self, job: &JobRef<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.stdin, job)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Tells the child to exit.
    fn finish(&mut self) -> Result<()> {
        self.send(&JobRef::Pill)
    }
}

impl Executor for RemoteExecutor {
    fn execute(&mut self, task: &Task) -> Result<TaskResult> {
        self.send(&JobRef::Work(task))?;

        self.line.clear();
        if self.stdout.read_line(&mut self.line)? == 0 {
            return Err(Error::backend("worker process closed its output"));
        }

        let reply: Reply = serde_json::from_str(self.line.trim_end())?;
        if reply.task_id != task.id {
            return Err(Error::protocol(format!(
                "reply for task {} while waiting on {}",
                reply.task_id, task.id
            )));
        }
        Ok(reply.result)
    }

    fn is_available(&mut self) -> bool {
        match self.child.lock().try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(%status, "worker process exited while idle");
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to poll worker process");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct ProcessUnit {
    id: WorkerId,
    name: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    relay: Option<JoinHandle<WorkerExit>>,
    halt: Arc<AtomicBool>,
    exit_code: Option<i32>,
}

impl ProcessUnit {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl WorkerUnit for ProcessUnit {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Follows the relay thread, which keeps consuming queue items (pills
    /// included) until it notices its child is gone.
    fn is_alive(&self) -> bool {
        self.relay.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn join(&mut self) -> Result<WorkerExit> {
        let relay = self
            .relay
            .take()
            .ok_or_else(|| Error::protocol(format!("{} already joined", self.name)))?;

        let exit = relay
            .join()
            .map_err(|payload| Error::WorkerPanic(PanicInfo::from_payload(payload).message));

        // always reap the child, whatever the relay did
        let status = self.child.lock().wait()?;
        self.exit_code = status.code();
        match status.code() {
            Some(0) => debug!(pid = self.pid, "worker process exited"),
            Some(code) => warn!(pid = self.pid, code, "worker process exited with error"),
            None => info!(pid = self.pid, "worker process killed by signal"),
        }

        exit
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn terminate(&mut self) -> Result<()> {
        self.halt.store(true, Ordering::Release);
        let mut child = self.child.lock();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        match child.kill() {
            Ok(()) => {
                info!(pid = self.pid, worker = self.id, "worker process terminated");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Child side of the protocol: reads jobs from `input` and writes one
/// [`Reply`] per task to `output` until a pill or end of input.
pub fn serve<R, W>(registry: &Registry, strategy: PanicStrategy, input: R, mut output: W) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    let panics = PanicHandler::new(strategy);
    let mut served = 0u64;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let task = match serde_json::from_str::<Job>(&line) {
            Ok(Job::Work(task)) => task,
            Ok(Job::Pill) => {
                info!(served, "poison pill received, exiting");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "malformed job line");
                return Err(e.into());
            }
        };

        let result = panics
            .execute(|| registry.execute(&task))
            .unwrap_or_else(|info| Err(info.into()));
        let reply = Reply {
            task_id: task.id,
            result,
        };

        serde_json::to_writer(&mut output, &reply)?;
        output.write_all(b"\n")?;
        output.flush()?;
        served += 1;
    }

    debug!(served, "input closed, exiting");
    Ok(())
}
