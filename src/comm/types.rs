use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer identity of a process within a run, `0 <= rank < size`.
pub type Rank = usize;

/// Traffic class of a point-to-point message.
///
/// Receives only match messages of the requested tag, which keeps task-queue
/// traffic from being consumed by a collective and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Collective,
    TaskQueue,
    User(u32),
}

/// A message as it sits in a receiver's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// The wire protocol between TCP peers.
///
/// - `Hello`: First frame on every connection, announces the connecting rank.
/// - `Message`: A point-to-point message.
/// - `Abort`: Tears the run down on the receiving process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Hello { rank: Rank, size: usize },
    Message(Envelope),
    Abort { origin: Rank, code: i32 },
}

/// The collective a `Tag::Collective` message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectiveKind {
    Broadcast,
    Scatter,
    Gather,
    AllGather,
    AllToAll,
    Reduce,
    AllReduce,
}

impl fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectiveKind::Broadcast => "broadcast",
            CollectiveKind::Scatter => "scatter",
            CollectiveKind::Gather => "gather",
            CollectiveKind::AllGather => "all_gather",
            CollectiveKind::AllToAll => "all_to_all",
            CollectiveKind::Reduce => "reduce",
            CollectiveKind::AllReduce => "all_reduce",
        };
        f.write_str(name)
    }
}

/// Header carried by every collective message.
///
/// `sequence` counts collective calls on the sending process; peers that
/// entered the same collectives in the same order always agree on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveFrame {
    pub kind: CollectiveKind,
    pub sequence: u64,
    pub payload: Vec<u8>,
}
