//! Distributed Task Queue Module
//!
//! This module implements the master/worker task queue that runs on top of
//! the message-passing substrate.
//!
//! ## Architecture Overview
//! The executor follows a **Push-based** model with readiness-driven dispatch:
//! 1. **Submission**: Tasks are submitted on the root into its `Backlog`.
//! 2. **Dispatch**: The root sends one task to every idle worker, point-to-point.
//! 3. **Execution**: A worker runs the handler registered for the task's kind and
//!    reports a `TaskResult`.
//! 4. **Drain**: Each result is recorded in the root's `ResultStore`, and the reporting
//!    worker immediately gets the next task, so faster workers take more work.
//! 5. **Shutdown**: With the backlog empty and nothing in flight, every worker gets
//!    exactly one `EndTask` sentinel.
//!
//! ## Submodules
//! - **`types`**: Task, result and lifecycle state definitions.
//! - **`protocol`**: Root/worker wire messages.
//! - **`queue`**: The root-owned `Backlog` and `ResultStore`.
//! - **`registry`**: Maps task kinds (e.g., "square") to executable Rust code.
//! - **`executor`**: The `TaskQueue` state machine (submit -> run -> shutdown).

pub mod types;
pub mod protocol;
pub mod queue;
pub mod executor;
pub mod registry;
