use crate::comm::types::Rank;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The distinguished coordinating rank.
pub const ROOT_RANK: Rank = 0;

/// Identity of the current process within a fixed-size run.
///
/// Created once when the transport comes up and never mutated afterwards.
/// `0 <= rank < size` holds for every value of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    rank: Rank,
    size: usize,
}

impl ProcessIdentity {
    pub fn new(rank: Rank, size: usize) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(Error::InvalidIdentity { rank, size });
        }
        Ok(Self { rank, size })
    }

    pub fn current_rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == ROOT_RANK
    }

    pub fn is_worker(&self) -> bool {
        !self.is_root()
    }

    pub fn is_rank(&self, rank: Rank) -> bool {
        self.rank == rank
    }

    pub fn is_in_set(&self, ranks: &[Rank]) -> bool {
        ranks.contains(&self.rank)
    }

    /// Number of non-root processes.
    pub fn worker_count(&self) -> usize {
        self.size - 1
    }

    pub fn worker_ranks(&self) -> Range<Rank> {
        1..self.size
    }

    /// Fails with `InvalidRank` when `rank` does not name a process of this run.
    pub fn check_rank(&self, rank: Rank) -> Result<Rank> {
        if rank < self.size {
            Ok(rank)
        } else {
            Err(Error::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }
}
