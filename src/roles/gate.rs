//! Role-gated execution.
//!
//! `gate` runs a closure only on the processes a `Role` admits and hands
//! every other process an explicit `Gated::NotExecuted`. The marker is a
//! variant of its own, so a closure that legitimately returns `None` or an
//! empty collection is never confused with "did not run here".

use super::identity::{ProcessIdentity, ROOT_RANK};
use crate::comm::types::Rank;
use crate::error::{Error, Result};

/// Predicate over the current rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Rank 0 only.
    Root,
    /// Every rank except the root.
    Workers,
    Rank(Rank),
    InSet(Vec<Rank>),
    All,
}

impl Role {
    pub fn admits(&self, identity: &ProcessIdentity) -> bool {
        match self {
            Role::Root => identity.is_rank(ROOT_RANK),
            Role::Workers => identity.is_worker(),
            Role::Rank(rank) => identity.is_rank(*rank),
            Role::InSet(ranks) => identity.is_in_set(ranks),
            Role::All => true,
        }
    }
}

/// Outcome of gated logic on one process.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Gated<T> {
    Executed(T),
    NotExecuted,
}

impl<T> Gated<T> {
    pub fn is_executed(&self) -> bool {
        matches!(self, Gated::Executed(_))
    }

    pub fn executed(&self) -> Option<&T> {
        match self {
            Gated::Executed(value) => Some(value),
            Gated::NotExecuted => None,
        }
    }

    pub fn into_executed(self) -> Option<T> {
        match self {
            Gated::Executed(value) => Some(value),
            Gated::NotExecuted => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Gated<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Gated::Executed(value) => Gated::Executed(f(value)),
            Gated::NotExecuted => Gated::NotExecuted,
        }
    }
}

/// Runs `logic` when `role` admits the current process.
///
/// A failure inside `logic` comes back as `Error::Logic`; callers route it
/// to `abort::escalate` rather than dropping it.
pub fn gate<T, F>(identity: &ProcessIdentity, role: &Role, logic: F) -> Result<Gated<T>>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    gate_with(identity, |_| role.admits(identity), logic)
}

/// Same as [`gate`] with an arbitrary predicate over the current rank.
pub fn gate_with<T, P, F>(identity: &ProcessIdentity, predicate: P, logic: F) -> Result<Gated<T>>
where
    P: FnOnce(Rank) -> bool,
    F: FnOnce() -> anyhow::Result<T>,
{
    if !predicate(identity.current_rank()) {
        tracing::trace!("Rank {} skipped gated logic", identity.current_rank());
        return Ok(Gated::NotExecuted);
    }

    logic().map(Gated::Executed).map_err(Error::Logic)
}
