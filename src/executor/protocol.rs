//! Dispatch Protocol Messages
//!
//! Defines the messages exchanged between the root and its workers while a
//! queue runs. Both directions travel point-to-point on `Tag::TaskQueue`, so
//! they never interleave with collective traffic.
//!
//! Per root/worker pair the exchange is strictly alternating:
//! `Run` → `Completed` → `Run` → ... → `EndTask` → `Terminated`.

use super::types::{Task, TaskResult};
use crate::comm::types::Rank;
use serde::{Deserialize, Serialize};

/// Root → worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchMessage {
    Run(Task),
    /// Shutdown sentinel. Never reaches a task handler.
    EndTask,
}

/// Worker → root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    Completed(TaskResult),
    /// Acknowledges `EndTask`.
    Terminated { rank: Rank },
}
