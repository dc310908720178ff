//! Collective Operations
//!
//! Named "compute, then propagate" wrappers over the substrate collectives,
//! plus the registry that turns operator names into reduction operators.
//!
//! ## Submodules
//! - **`adapters`**: `Collectives` (broadcast/scatter/gather/all-gather/all-to-all) and the
//!   pre-configured `Reducer` (reduce / all-reduce).
//! - **`reduction`**: `ReduceOp` name registry and the `Reducible` operand trait.

pub mod adapters;
pub mod reduction;
