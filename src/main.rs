use std::io;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use fibpool::app::{self, Mode, RunOptions};
use fibpool::pool::WorkerCommand;
use fibpool::worker;

#[derive(Parser, Debug)]
#[command(name = "fibpool", version)]
#[command(about = "Compute a Fibonacci number once per processor on a pool of worker processes", long_about = None)]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Fibonacci index to compute
    #[arg(value_name = "N", required_unless_present = "worker")]
    n: Option<i64>,

    /// Number of worker processes (defaults to number of logical CPUs)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Compute every task in this process instead of on the pool
    #[arg(long)]
    sequential: bool,

    /// Disable progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Serve pool requests on stdin/stdout
    #[arg(long, hide = true, conflicts_with_all = ["n", "sequential"])]
    worker: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.worker {
        worker::serve_stdio().context("worker failed")?;
        return Ok(());
    }

    let Some(n) = args.n else {
        anyhow::bail!("missing Fibonacci index");
    };

    let options = RunOptions {
        n,
        workers: args.workers,
        mode: if args.sequential {
            Mode::Sequential
        } else {
            Mode::Parallel
        },
        progress: !args.quiet,
    };

    // Workers log at the same level as the parent.
    let mut command =
        WorkerCommand::current_exe().context("Failed to locate the running executable")?;
    for _ in 0..args.verbose {
        command = command.arg("-v");
    }

    app::run(&options, &command, &mut io::stdout().lock())?;
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}
