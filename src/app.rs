//! One benchmark run: banner, fan-out, execution, join.

use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::info;

use crate::fib::run_sequential;
use crate::parallel::{fan_out, parallelism, Task};
use crate::pool::{Completion, ProcessPool, WorkerCommand};
use crate::progress::create_progress_bar;

pub const DISCLAIMER: &str = "The returned value varies by environment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One task per worker process.
    Parallel,
    /// Every task in the calling process, in order.
    Sequential,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub n: i64,
    pub workers: Option<usize>,
    pub mode: Mode,
    pub progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks: usize,
    pub completed: usize,
}

/// Prints the banner to `out`, then computes F(n) once per worker.
///
/// Computed values are discarded. The first task failure retrieved is
/// returned as the error; the pool still waits for the remaining tasks
/// before it is torn down.
pub fn run<W: Write>(options: &RunOptions, command: &WorkerCommand, out: &mut W) -> Result<RunSummary> {
    let workers = parallelism(options.workers)?;

    writeln!(out, "{DISCLAIMER}")?;
    writeln!(out, "cpu_count={}", num_cpus::get())?;
    out.flush()?;

    let tasks = fan_out(options.n, workers);
    let progress = create_progress_bar(tasks.len(), options.progress)?;
    let start_time = Instant::now();

    let completed = match options.mode {
        Mode::Parallel => run_parallel(&tasks, workers, command, &progress)?,
        Mode::Sequential => {
            let completed = run_sequential(&tasks);
            progress.inc(completed as u64);
            completed
        }
    };

    progress.finish_and_clear();
    info!(
        mode = ?options.mode,
        n = options.n,
        workers,
        elapsed = ?start_time.elapsed(),
        "all tasks completed"
    );

    Ok(RunSummary {
        tasks: tasks.len(),
        completed,
    })
}

fn run_parallel(
    tasks: &[Task],
    workers: usize,
    command: &WorkerCommand,
    progress: &ProgressBar,
) -> Result<usize> {
    ProcessPool::scope(workers, command, |pool| -> Result<usize> {
        for task in tasks {
            pool.submit(task.n)?;
        }
        join_all(pool.completions(), progress)
    })
    .context("parallel run failed")
}

/// Consumes completions in whatever order they arrive.
///
/// Stops at the first failure and returns it; otherwise returns how many
/// tasks completed.
pub fn join_all<I>(completions: I, progress: &ProgressBar) -> Result<usize>
where
    I: IntoIterator<Item = Completion>,
{
    let mut completed = 0;
    for completion in completions {
        let (id, n) = (completion.id, completion.n);
        completion
            .result()
            .with_context(|| format!("task {id} (n = {n}) failed"))?;
        completed += 1;
        progress.inc(1);
    }
    Ok(completed)
}
