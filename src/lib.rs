//! Computes one Fibonacci number per processor on a pool of worker
//! processes, as a benchmark of process-level parallelism.

pub mod app;
pub mod fib;
pub mod parallel;
pub mod pool;
pub mod progress;
pub mod worker;
