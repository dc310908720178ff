//! Identity & Role Context
//!
//! Answers "who am I in this run" and decides whether a unit of logic runs
//! on the current process.
//!
//! ## Submodules
//! - **`identity`**: The immutable `ProcessIdentity` (rank, size) captured once at startup.
//! - **`gate`**: `Role` predicates, the `Gated` outcome marker, and the `gate` wrapper.

pub mod gate;
pub mod identity;

#[cfg(test)]
mod tests;
