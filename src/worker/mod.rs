//! Worker side of the process pool.
//!
//! A worker is this same binary started with `--worker`. It reads one
//! [`TaskRequest`] per line from stdin, answers with one [`TaskReply`] per
//! line on stdout and exits when stdin closes.

use std::any::Any;
use std::io::{self, BufRead, Write};
use std::panic;

use thiserror::Error;
use tracing::debug;

use crate::fib::fibonacci;
use crate::pool::protocol::{ReplyOutcome, TaskReply, TaskRequest};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker pipe I/O failed")]
    Io(#[from] io::Error),

    #[error("malformed request on line {line}")]
    Request {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode reply")]
    Reply(#[source] serde_json::Error),
}

/// Serves requests until `input` reaches EOF. Returns the number answered.
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<usize, WorkerError> {
    let mut answered = 0;

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: TaskRequest =
            serde_json::from_str(&line).map_err(|source| WorkerError::Request {
                line: index + 1,
                source,
            })?;

        let reply = handle(request);
        serde_json::to_writer(&mut output, &reply).map_err(WorkerError::Reply)?;
        output.write_all(b"\n")?;
        output.flush()?;
        answered += 1;
    }

    debug!(answered, "worker input closed");
    Ok(answered)
}

/// Runs the worker loop over the process's own stdin/stdout.
pub fn serve_stdio() -> Result<usize, WorkerError> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(stdin.lock(), stdout.lock())
}

fn handle(request: TaskRequest) -> TaskReply {
    let outcome = match panic::catch_unwind(|| fibonacci(request.n)) {
        Ok(value) => ReplyOutcome::Ok {
            value: value.to_string(),
        },
        Err(payload) => ReplyOutcome::Failed {
            message: panic_message(payload.as_ref()),
        },
    };

    TaskReply {
        id: request.id,
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
