//! Line-delimited JSON exchanged between the pool and its workers.
//!
//! Each message is a single line. Values travel as decimal strings so the
//! arbitrary-precision result survives any JSON number limits.

use serde::{Deserialize, Serialize};

/// Parent to worker: compute F(n) for task `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: u64,
    pub n: i64,
}

/// Worker to parent: the outcome of task `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReply {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Ok { value: String },
    Failed { message: String },
}
