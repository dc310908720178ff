//! Error Types
//!
//! One error enum for the whole engine. User-supplied logic (gated closures,
//! collective compute steps, task handlers) reports failures through
//! `anyhow::Result`; the engine wraps them into `Error::Logic` or
//! `Error::TaskExecutionFailure` before they reach the abort boundary.

use crate::comm::types::Rank;
use thiserror::Error;

/// Exit status used when a process tears the run down.
pub const ABORT_EXIT_CODE: i32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    /// A reduction operator name outside the closed set was supplied.
    #[error("Unknown reduction operator '{name}'. Supported operations (case insensitive): {valid}")]
    UnknownReductionOperator { name: String, valid: String },

    /// The operator exists but is not defined for the operand type.
    #[error("Reduction '{op}' is not defined for {operand}")]
    UnsupportedReduction { op: String, operand: String },

    #[error("Task {task_id} failed: {reason}")]
    TaskExecutionFailure { task_id: String, reason: String },

    /// A peer answered a different collective than the one this process entered.
    #[error("Collective mismatch: expected {expected}, received {found}")]
    CollectiveMismatch { expected: String, found: String },

    /// The run was torn down; `origin` is the rank that called `abort_all`.
    #[error("Run aborted by process {origin} (exit code {code})")]
    ProcessAbort { origin: Rank, code: i32 },

    #[error("Invalid process identity: rank {rank} in a run of size {size}")]
    InvalidIdentity { rank: Rank, size: usize },

    #[error("Rank {rank} is outside a run of size {size}")]
    InvalidRank { rank: Rank, size: usize },

    #[error("{operation} is only available on the root process")]
    RootOnly { operation: &'static str },

    #[error("Task {0} was already submitted")]
    DuplicateTask(String),

    #[error("A result for task {0} was already recorded")]
    DuplicateResult(String),

    #[error("{operation} expected {expected} values, got {actual}")]
    LengthMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Root process supplied no value for {operation}")]
    MissingRootValue { operation: &'static str },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Task queue on rank {rank} already ran to completion")]
    QueueClosed { rank: Rank },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logic failed: {0:#}")]
    Logic(anyhow::Error),
}

impl Error {
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::ProcessAbort { .. })
    }

    /// Maps an error to the status the process should exit with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProcessAbort { code, .. } if *code != 0 => *code,
            _ => ABORT_EXIT_CODE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
