//! Collective Operation Adapters
//!
//! Each adapter binds "compute locally, then move the data" into one call on
//! top of the `Communicator` collectives:
//!
//! | Adapter | Who computes | Who receives |
//! |---|---|---|
//! | `broadcast_from(root)` | `root` | every rank, identical value |
//! | `scatter_from(root)` | `root` | rank `i` gets partition `i` |
//! | `gather_to(root)` | every rank | `root`, ordered by sender rank |
//! | `gather_to_all` | every rank | every rank, ordered by sender rank |
//! | `all_to_all` | every rank | entry per sender, indexed by sender rank |
//! | `Reducer::reduce_to(root)` | every rank | `root`, folded value |
//! | `Reducer::reduce_to_all` | every rank | every rank, folded value |
//!
//! Any failure (in the compute step or in the collective itself) is escalated
//! to a whole-run abort, since peers already inside the collective would
//! otherwise wait forever.

use super::reduction::{ReduceOp, Reducible};
use crate::abort;
use crate::comm::types::Rank;
use crate::comm::{Communicator, Payload};
use crate::error::{Error, Result};
use crate::roles::gate::{Gated, Role, gate};
use crate::roles::identity::{ProcessIdentity, ROOT_RANK};

#[derive(Clone)]
pub struct Collectives {
    comm: Communicator,
}

impl Collectives {
    pub fn new(comm: Communicator) -> Self {
        Self { comm }
    }

    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.comm.identity()
    }

    /// Runs `logic` on `root` only and hands its value to every rank.
    pub async fn broadcast_from<T, F>(&self, root: Rank, logic: F) -> Result<T>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<T>,
    {
        abort::guard(&self.comm, async {
            let value = gate(&self.identity(), &Role::Rank(root), logic)?.into_executed();
            self.comm.broadcast(value, root).await
        })
        .await
    }

    pub async fn broadcast_from_main<T, F>(&self, logic: F) -> Result<T>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.broadcast_from(ROOT_RANK, logic).await
    }

    /// Runs `logic` on `root` only; it must return one partition per rank.
    pub async fn scatter_from<T, F>(&self, root: Rank, logic: F) -> Result<T>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<Vec<T>>,
    {
        abort::guard(&self.comm, async {
            let partitions = gate(&self.identity(), &Role::Rank(root), logic)?.into_executed();
            self.comm.scatter(partitions, root).await
        })
        .await
    }

    pub async fn scatter_from_main<T, F>(&self, logic: F) -> Result<T>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<Vec<T>>,
    {
        self.scatter_from(ROOT_RANK, logic).await
    }

    /// Runs `logic` everywhere; `root` receives all values, others `NotExecuted`.
    pub async fn gather_to<T, F>(&self, root: Rank, logic: F) -> Result<Gated<Vec<T>>>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<T>,
    {
        abort::guard(&self.comm, async {
            let value = logic().map_err(Error::Logic)?;
            self.comm.gather(value, root).await
        })
        .await
    }

    pub async fn gather_to_main<T, F>(&self, logic: F) -> Result<Gated<Vec<T>>>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.gather_to(ROOT_RANK, logic).await
    }

    pub async fn gather_to_all<T, F>(&self, logic: F) -> Result<Vec<T>>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<T>,
    {
        abort::guard(&self.comm, async {
            let value = logic().map_err(Error::Logic)?;
            self.comm.all_gather(value).await
        })
        .await
    }

    /// Runs `logic` everywhere; entry `j` of its output is delivered to rank `j`.
    pub async fn all_to_all<T, F>(&self, logic: F) -> Result<Vec<T>>
    where
        T: Payload,
        F: FnOnce() -> anyhow::Result<Vec<T>>,
    {
        abort::guard(&self.comm, async {
            let values = logic().map_err(Error::Logic)?;
            self.comm.all_to_all(values).await
        })
        .await
    }

    /// Resolves `op` now so an unknown operator name fails at setup.
    ///
    /// The error goes back to the caller; nothing is aborted.
    pub fn reducer(&self, op: &str) -> Result<Reducer> {
        let op = ReduceOp::resolve(op)?;
        Ok(self.reducer_with(op))
    }

    pub fn reducer_with(&self, op: ReduceOp) -> Reducer {
        Reducer {
            comm: self.comm.clone(),
            op,
        }
    }
}

/// A reduce adapter with its operator already resolved.
#[derive(Clone)]
pub struct Reducer {
    comm: Communicator,
    op: ReduceOp,
}

impl Reducer {
    pub fn op(&self) -> ReduceOp {
        self.op
    }

    pub async fn reduce_to<T, F>(&self, root: Rank, logic: F) -> Result<Gated<T>>
    where
        T: Payload + Reducible,
        F: FnOnce() -> anyhow::Result<T>,
    {
        abort::guard(&self.comm, async {
            let value = logic().map_err(Error::Logic)?;
            self.comm.reduce(value, self.op, root).await
        })
        .await
    }

    pub async fn reduce_to_main<T, F>(&self, logic: F) -> Result<Gated<T>>
    where
        T: Payload + Reducible,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.reduce_to(ROOT_RANK, logic).await
    }

    pub async fn reduce_to_all<T, F>(&self, logic: F) -> Result<T>
    where
        T: Payload + Reducible,
        F: FnOnce() -> anyhow::Result<T>,
    {
        abort::guard(&self.comm, async {
            let value = logic().map_err(Error::Logic)?;
            self.comm.all_reduce(value, self.op).await
        })
        .await
    }
}
