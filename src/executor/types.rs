use crate::comm::types::Rank;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier for a task within a run.
///
/// Wrapper around a string so callers can pick readable ids; `TaskId::new`
/// falls back to a random UUID v4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The definition of a unit of work plus its lifecycle stamps.
///
/// `kind` names the registered handler that executes it; `parameters` is an
/// arbitrary JSON payload passed to that handler. The timestamps and
/// `assigned_worker` are filled in by the root as the task moves through the
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: String,
    #[serde(with = "json_text")]
    pub parameters: serde_json::Value,
    /// Only consulted by the priority backlog; higher runs first.
    pub priority: i32,
    /// Timestamp (ms) when the task was created.
    pub created_at: u64,
    /// Timestamp (ms) when the root sent the task to a worker.
    pub started_at: Option<u64>,
    /// Timestamp (ms) when the root recorded the task's result.
    pub completed_at: Option<u64>,
    pub assigned_worker: Option<Rank>,
}

impl Task {
    pub fn new(kind: &str, parameters: serde_json::Value) -> Self {
        Self::with_id(TaskId::new(), kind, parameters)
    }

    pub fn with_id(task_id: impl Into<TaskId>, kind: &str, parameters: serde_json::Value) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.to_string(),
            parameters,
            priority: 0,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            assigned_worker: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// What an execution produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskOutcome {
    Success {
        #[serde(with = "json_text")]
        value: serde_json::Value,
    },
    /// Only recorded under the continue-on-failure policy.
    Failed { error: String },
}

/// The completed outcome of one task, built by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    pub execution_time: Duration,
    pub worker_rank: Rank,
    pub completed_at: u64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            TaskOutcome::Success { value } => Some(value),
            TaskOutcome::Failed { .. } => None,
        }
    }
}

/// Lifecycle of a worker process within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Blocked on the next message from the root.
    Waiting,
    Executing,
    /// Received `EndTask`; never receives another task in this run.
    Terminated,
}

/// Lifecycle of the root's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Idle,
    Dispatching,
    Draining,
    ShuttingDown,
    Done,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Carries a JSON value as its text form, so it survives non-self-describing
/// codecs such as bincode.
mod json_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}
