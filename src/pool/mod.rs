//! A fixed-size pool of worker processes.
//!
//! Every worker is a child process speaking the line protocol in
//! [`protocol`]. The parent owns all bookkeeping: which task each worker is
//! running, which tasks are still queued, and which outcomes are ready to be
//! handed out. One reader thread per worker turns reply lines into events on
//! a channel; workers never touch the pool's state directly.
//!
//! Completions are handed out in the order they arrive, not in submission
//! order. A failed task produces a failed [`Completion`]; it never blocks the
//! completions of other tasks.

pub mod protocol;

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use num_bigint::BigUint;
use thiserror::Error;
use tracing::{debug, warn};

use self::protocol::{ReplyOutcome, TaskReply, TaskRequest};

pub type TaskId = u64;

/// Errors raised by the pool itself, as opposed to by a task.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("a pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker {index} ({program})")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {index} was spawned without piped stdio")]
    MissingPipe { index: usize },

    #[error("failed to start the reader thread for worker {index}")]
    Reader {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for worker process {pid}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("the pool has been shut down")]
    ShutDown,
}

/// Why a single task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task panicked in its worker: {0}")]
    Panicked(String),

    #[error("worker {worker} (pid {pid}) exited while running the task")]
    WorkerExited { worker: usize, pid: u32 },

    #[error("no live workers remain in the pool")]
    BrokenPool,

    #[error("worker replied with a value that is not an integer: {0:?}")]
    InvalidValue(String),
}

/// The program and arguments used to start each worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-executes the running binary in worker mode.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("--worker"))
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

/// The terminal outcome of one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: TaskId,
    pub n: i64,
    pub outcome: Result<BigUint, TaskError>,
}

impl Completion {
    pub fn new(id: TaskId, n: i64, outcome: Result<BigUint, TaskError>) -> Self {
        Self { id, n, outcome }
    }

    pub fn result(self) -> Result<BigUint, TaskError> {
        self.outcome
    }

    fn failed(task: Submitted, err: TaskError) -> Self {
        Self::new(task.id, task.n, Err(err))
    }
}

#[derive(Debug, Clone, Copy)]
struct Submitted {
    id: TaskId,
    n: i64,
}

/// How one worker process ended.
#[derive(Debug)]
pub struct WorkerExit {
    pub index: usize,
    pub pid: u32,
    pub status: ExitStatus,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerExit>,
}

impl ShutdownReport {
    pub fn all_succeeded(&self) -> bool {
        self.workers.iter().all(|exit| exit.status.success())
    }
}

enum WorkerEvent {
    Reply { worker: usize, reply: TaskReply },
    Closed { worker: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Running,
    ShuttingDown,
    Closed,
}

struct WorkerSlot {
    index: usize,
    pid: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    in_flight: Option<Submitted>,
    alive: bool,
}

impl WorkerSlot {
    fn spawn(
        index: usize,
        command: &WorkerCommand,
        events: Sender<WorkerEvent>,
    ) -> Result<Self, PoolError> {
        let mut child = command
            .build()
            .spawn()
            .map_err(|source| PoolError::Spawn {
                index,
                program: command.program.display().to_string(),
                source,
            })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(PoolError::MissingPipe { index });
        };

        let reader = thread::Builder::new()
            .name(format!("fibpool-reader-{index}"))
            .spawn(move || read_replies(index, stdout, events));
        let reader = match reader {
            Ok(handle) => handle,
            Err(source) => {
                reap(&mut child);
                return Err(PoolError::Reader { index, source });
            }
        };

        debug!(worker = index, pid, "spawned worker");

        Ok(Self {
            index,
            pid,
            child,
            stdin: Some(stdin),
            reader: Some(reader),
            in_flight: None,
            alive: true,
        })
    }

    fn is_idle(&self) -> bool {
        self.alive && self.in_flight.is_none()
    }

    fn send(&mut self, task: Submitted) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin closed"))?;

        let mut line = serde_json::to_vec(&TaskRequest {
            id: task.id,
            n: task.n,
        })?;
        line.push(b'\n');
        stdin.write_all(&line)?;
        stdin.flush()?;

        self.in_flight = Some(task);
        Ok(())
    }

    /// Closes the worker's input and blocks until the process has exited.
    fn close(&mut self) -> Result<WorkerExit, PoolError> {
        drop(self.stdin.take());
        if !self.alive {
            // It may have stopped talking without exiting.
            let _ = self.child.kill();
        }

        let status = self.child.wait().map_err(|source| PoolError::Wait {
            pid: self.pid,
            source,
        })?;

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(worker = self.index, "reader thread panicked");
            }
        }

        debug!(worker = self.index, pid = self.pid, %status, "worker exited");
        Ok(WorkerExit {
            index: self.index,
            pid: self.pid,
            status,
        })
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_replies(worker: usize, stdout: ChildStdout, events: Sender<WorkerEvent>) {
    let reason = forward_replies(worker, stdout, &events);
    let _ = events.send(WorkerEvent::Closed { worker, reason });
}

fn forward_replies(worker: usize, stdout: ChildStdout, events: &Sender<WorkerEvent>) -> String {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => return format!("read failed: {err}"),
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<TaskReply>(&line) {
            Ok(reply) => {
                if events.send(WorkerEvent::Reply { worker, reply }).is_err() {
                    return "pool dropped".to_string();
                }
            }
            Err(err) => return format!("malformed reply: {err}"),
        }
    }
    "end of output".to_string()
}

fn outcome_from_reply(outcome: ReplyOutcome) -> Result<BigUint, TaskError> {
    match outcome {
        ReplyOutcome::Ok { value } => value
            .parse::<BigUint>()
            .map_err(|_| TaskError::InvalidValue(value)),
        ReplyOutcome::Failed { message } => Err(TaskError::Panicked(message)),
    }
}

/// A pool of worker processes.
///
/// Dropping the pool shuts it down; prefer [`ProcessPool::scope`] or an
/// explicit [`ProcessPool::shutdown`] to observe teardown errors.
pub struct ProcessPool {
    workers: Vec<WorkerSlot>,
    events: Receiver<WorkerEvent>,
    pending: VecDeque<Submitted>,
    ready: VecDeque<Completion>,
    // Submitted but not yet handed out.
    outstanding: usize,
    next_id: TaskId,
    state: PoolState,
}

impl ProcessPool {
    /// Starts `workers` worker processes.
    pub fn spawn(workers: usize, command: &WorkerCommand) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut pool = Self {
            workers: Vec::with_capacity(workers),
            events,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            outstanding: 0,
            next_id: 0,
            state: PoolState::Running,
        };

        // On error the partially built pool is dropped and reaps what it has.
        for index in 0..workers {
            let slot = WorkerSlot::spawn(index, command, events_tx.clone())?;
            pool.workers.push(slot);
        }

        Ok(pool)
    }

    /// Runs `f` against a fresh pool and shuts the pool down afterwards,
    /// whether or not `f` succeeded. An error from `f` takes precedence over
    /// a teardown error.
    pub fn scope<T, E, F>(workers: usize, command: &WorkerCommand, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ProcessPool) -> Result<T, E>,
        E: From<PoolError>,
    {
        let mut pool = ProcessPool::spawn(workers, command)?;
        let outcome = f(&mut pool);
        let teardown = pool.shutdown();
        let value = outcome?;
        teardown?;
        Ok(value)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(|slot| slot.pid).collect()
    }

    /// Tasks submitted whose completion has not been handed out yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Queues F(n) for computation and returns its task id.
    pub fn submit(&mut self, n: i64) -> Result<TaskId, PoolError> {
        if self.state != PoolState::Running {
            return Err(PoolError::ShutDown);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.outstanding += 1;
        self.pending.push_back(Submitted { id, n });
        self.dispatch_pending();
        Ok(id)
    }

    /// Blocks until some task reaches a terminal state and returns it.
    ///
    /// Returns `None` once every submitted task has been handed out.
    pub fn next_completion(&mut self) -> Option<Completion> {
        loop {
            if let Some(completion) = self.ready.pop_front() {
                self.outstanding -= 1;
                return Some(completion);
            }
            if self.outstanding == 0 {
                return None;
            }

            match self.events.recv() {
                Ok(event) => self.handle(event),
                Err(_) => self.abandon_all(),
            }
        }
    }

    /// Iterates over completions as they become available.
    pub fn completions(&mut self) -> Completions<'_> {
        Completions { pool: self }
    }

    /// Waits for every submitted task, closes the workers and blocks until
    /// they have all exited.
    ///
    /// Outcomes not yet retrieved are discarded. Calling this more than once
    /// is harmless.
    pub fn shutdown(&mut self) -> Result<ShutdownReport, PoolError> {
        if self.state == PoolState::Closed {
            return Ok(ShutdownReport::default());
        }
        self.state = PoolState::ShuttingDown;

        while let Some(completion) = self.next_completion() {
            if let Err(err) = completion.outcome {
                warn!(task = completion.id, %err, "discarding failed task during shutdown");
            }
        }

        let mut report = ShutdownReport::default();
        let mut first_error = None;
        for slot in &mut self.workers {
            match slot.close() {
                Ok(exit) => report.workers.push(exit),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        self.state = PoolState::Closed;

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply { worker, reply } => {
                let slot = &mut self.workers[worker];
                match slot.in_flight.take() {
                    Some(task) if task.id == reply.id => {
                        self.ready.push_back(Completion::new(
                            task.id,
                            task.n,
                            outcome_from_reply(reply.outcome),
                        ));
                    }
                    other => {
                        slot.in_flight = other;
                        warn!(worker, task = reply.id, "discarding reply for a task the worker was not running");
                    }
                }
            }
            WorkerEvent::Closed { worker, reason } => {
                let slot = &mut self.workers[worker];
                slot.alive = false;
                debug!(worker, pid = slot.pid, %reason, "worker output closed");

                if let Some(task) = slot.in_flight.take() {
                    let err = TaskError::WorkerExited {
                        worker,
                        pid: slot.pid,
                    };
                    self.ready.push_back(Completion::failed(task, err));
                }
            }
        }
        self.dispatch_pending();
    }

    fn dispatch_pending(&mut self) {
        while !self.pending.is_empty() {
            let Some(worker) = self.workers.iter().position(WorkerSlot::is_idle) else {
                break;
            };
            let Some(task) = self.pending.pop_front() else {
                break;
            };

            if let Err(err) = self.workers[worker].send(task) {
                warn!(worker, %err, "worker stopped accepting tasks");
                self.workers[worker].alive = false;
                self.pending.push_front(task);
            }
        }

        if !self.pending.is_empty() && self.workers.iter().all(|slot| !slot.alive) {
            while let Some(task) = self.pending.pop_front() {
                self.ready
                    .push_back(Completion::failed(task, TaskError::BrokenPool));
            }
        }
    }

    // Every reader thread is gone, so nothing in flight will ever reply.
    fn abandon_all(&mut self) {
        for slot in &mut self.workers {
            slot.alive = false;
            if let Some(task) = slot.in_flight.take() {
                self.ready
                    .push_back(Completion::failed(task, TaskError::BrokenPool));
            }
        }
        while let Some(task) = self.pending.pop_front() {
            self.ready
                .push_back(Completion::failed(task, TaskError::BrokenPool));
        }
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "process pool shutdown failed");
        }
    }
}

/// Completions in arrival order; see [`ProcessPool::completions`].
pub struct Completions<'a> {
    pool: &'a mut ProcessPool,
}

impl Iterator for Completions<'_> {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        self.pool.next_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_reply() {
        assert_eq!(
            outcome_from_reply(ReplyOutcome::Ok {
                value: "6765".into()
            }),
            Ok(BigUint::from(6765u32))
        );
        assert_eq!(
            outcome_from_reply(ReplyOutcome::Ok {
                value: "-3".into()
            }),
            Err(TaskError::InvalidValue("-3".into()))
        );
        assert_eq!(
            outcome_from_reply(ReplyOutcome::Failed {
                message: "boom".into()
            }),
            Err(TaskError::Panicked("boom".into()))
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let command = WorkerCommand::new("unused");
        assert!(matches!(
            ProcessPool::spawn(0, &command),
            Err(PoolError::NoWorkers)
        ));
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let command = WorkerCommand::new("/nonexistent/fibpool-worker");
        let err = ProcessPool::spawn(2, &command).err().unwrap();
        assert!(matches!(err, PoolError::Spawn { index: 0, .. }));
    }
}
