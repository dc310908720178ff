//! Distributed Task Queue Library
//!
//! This library crate defines the core modules of a master/worker task queue
//! running over a message-passing process group. It serves as the foundation
//! for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled layers, bottom-up:
//!
//! - **`comm`**: The message-passing substrate. Rank/size, tagged point-to-point
//!   messages, the seven collectives and a whole-run abort, over an in-memory mesh
//!   or a full TCP mesh.
//! - **`roles`**: Each process's immutable `(rank, size)` identity and the role gate
//!   that runs a block of logic only on the processes it names.
//! - **`collective`**: "Compute, then propagate" adapters over the collectives and the
//!   registry of reduction operators.
//! - **`executor`**: The task queue itself. The root owns the backlog and dispatches
//!   tasks to idle workers; workers execute and report back until they receive the
//!   `EndTask` sentinel.
//! - **`abort`**: The single boundary where a fatal error becomes a whole-run abort.
//! - **`config`** / **`error`**: Run configuration and the crate-wide error type.

pub mod abort;
pub mod collective;
pub mod comm;
pub mod config;
pub mod error;
pub mod executor;
pub mod roles;
