//! Message-Passing Substrate
//!
//! The narrow interface the rest of the engine consumes: rank/size, blocking
//! point-to-point send/receive, the seven collectives, and a whole-run abort.
//!
//! ## Architecture Overview
//! 1. **Transport**: An object-safe trait moving tagged byte payloads between ranks.
//!    Messages between a given pair with the same tag arrive in send order.
//! 2. **Mailbox**: Every transport feeds inbound envelopes into a per-rank mailbox that
//!    supports selective receive by `(source, tag)` and fails every receive once aborted.
//! 3. **Communicator**: A cloneable typed handle. Values are encoded with bincode and the
//!    collectives are linear algorithms over `Tag::Collective` messages.
//!
//! ## Collective ordering
//! Every process must call the same collectives in the same order. Each collective
//! message carries `(kind, sequence)`, so a peer that entered a different collective is
//! reported as `CollectiveMismatch` when one of its frames reaches us. Mismatches that
//! never deliver a frame still block, exactly like the underlying substrate would.
//!
//! ## Submodules
//! - **`types`**: Ranks, tags, envelopes and wire frames.
//! - **`mailbox`**: Buffered selective-receive inbox with abort support.
//! - **`local`**: In-memory mesh running every rank inside one process.
//! - **`tcp`**: Full-mesh TCP transport, one OS process per rank.

pub mod local;
pub mod mailbox;
pub mod tcp;
pub mod types;

#[cfg(test)]
mod tests;

use crate::collective::reduction::{ReduceOp, Reducible};
use crate::error::{Error, Result};
use crate::roles::gate::Gated;
use crate::roles::identity::ProcessIdentity;
use mailbox::AbortSignal;
use types::{CollectiveFrame, CollectiveKind, Envelope, Rank, Tag};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything that can travel between ranks.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Raw point-to-point transport between the processes of one run.
#[async_trait]
pub trait Transport: Send + Sync {
    fn identity(&self) -> ProcessIdentity;

    async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Blocks until a message with `tag` arrives; `source = None` accepts any sender.
    async fn recv(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope>;

    /// Terminates every process of the run abnormally with `code`.
    async fn abort_all(&self, code: i32);

    /// The abort that reached this process, if any.
    fn abort_signal(&self) -> Option<AbortSignal>;
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Typed handle on a transport, shared by every component of one process.
#[derive(Clone)]
pub struct Communicator {
    transport: Arc<dyn Transport>,
    identity: ProcessIdentity,
    sequence: Arc<AtomicU64>,
}

impl Communicator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let identity = transport.identity();
        Self {
            transport,
            identity,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    pub fn rank(&self) -> Rank {
        self.identity.current_rank()
    }

    pub fn size(&self) -> usize {
        self.identity.world_size()
    }

    // --- Point-to-point ---

    pub async fn send<T: Payload>(&self, value: &T, dest: Rank, tag: Tag) -> Result<()> {
        let dest = self.identity.check_rank(dest)?;
        let payload = encode(value)?;
        self.transport.send(dest, tag, payload).await
    }

    pub async fn receive<T: Payload>(&self, source: Rank, tag: Tag) -> Result<T> {
        let source = self.identity.check_rank(source)?;
        let envelope = self.transport.recv(Some(source), tag).await?;
        decode(&envelope.payload)
    }

    /// Receives the next message with `tag` from whichever rank sent first.
    pub async fn receive_any<T: Payload>(&self, tag: Tag) -> Result<(Rank, T)> {
        let envelope = self.transport.recv(None, tag).await?;
        Ok((envelope.source, decode(&envelope.payload)?))
    }

    pub async fn abort_all(&self, code: i32) {
        self.transport.abort_all(code).await;
    }

    pub fn abort_signal(&self) -> Option<AbortSignal> {
        self.transport.abort_signal()
    }

    /// Fails with `ProcessAbort` if any process aborted the run.
    pub fn check_aborted(&self) -> Result<()> {
        match self.abort_signal() {
            Some(signal) => Err(Error::ProcessAbort {
                origin: signal.origin,
                code: signal.code,
            }),
            None => Ok(()),
        }
    }

    /// Closing synchronization. Returns only once every rank got here and no
    /// rank aborted the run, so a process never reports success for a run
    /// that a peer tore down after this process's last message.
    pub async fn finalize(&self) -> Result<()> {
        self.all_gather(()).await?;
        self.check_aborted()
    }

    // --- Collectives ---

    /// One-to-all. Only `root` supplies a value; every rank returns it.
    pub async fn broadcast<T: Payload>(&self, value: Option<T>, root: Rank) -> Result<T> {
        let root = self.identity.check_rank(root)?;
        let sequence = self.next_sequence();

        if self.rank() != root {
            return self
                .receive_collective(CollectiveKind::Broadcast, sequence, root)
                .await;
        }

        let value = value.ok_or(Error::MissingRootValue {
            operation: "broadcast",
        })?;
        let frame = self.collective_frame(CollectiveKind::Broadcast, sequence, &value)?;
        for dest in (0..self.size()).filter(|&dest| dest != root) {
            self.transport
                .send(dest, Tag::Collective, frame.clone())
                .await?;
        }
        Ok(value)
    }

    /// One-to-all partitioned. `root` supplies exactly `size` values; rank `i` gets the `i`-th.
    pub async fn scatter<T: Payload>(&self, values: Option<Vec<T>>, root: Rank) -> Result<T> {
        let root = self.identity.check_rank(root)?;
        let sequence = self.next_sequence();

        if self.rank() != root {
            return self
                .receive_collective(CollectiveKind::Scatter, sequence, root)
                .await;
        }

        let values = values.ok_or(Error::MissingRootValue {
            operation: "scatter",
        })?;
        if values.len() != self.size() {
            return Err(Error::LengthMismatch {
                operation: "scatter",
                expected: self.size(),
                actual: values.len(),
            });
        }

        let mut own = None;
        for (dest, value) in values.into_iter().enumerate() {
            if dest == root {
                own = Some(value);
                continue;
            }
            let frame = self.collective_frame(CollectiveKind::Scatter, sequence, &value)?;
            self.transport.send(dest, Tag::Collective, frame).await?;
        }

        own.ok_or(Error::MissingRootValue {
            operation: "scatter",
        })
    }

    /// All-to-one. `root` gets every value ordered by sender rank.
    pub async fn gather<T: Payload>(&self, value: T, root: Rank) -> Result<Gated<Vec<T>>> {
        let root = self.identity.check_rank(root)?;
        let sequence = self.next_sequence();
        let collected = self
            .collect_at(CollectiveKind::Gather, sequence, value, root)
            .await?;
        Ok(collected.map_or(Gated::NotExecuted, Gated::Executed))
    }

    /// All-to-all. Every rank gets every value ordered by sender rank.
    pub async fn all_gather<T: Payload>(&self, value: T) -> Result<Vec<T>> {
        let sequence = self.next_sequence();
        self.exchange_all(CollectiveKind::AllGather, sequence, value)
            .await
    }

    /// Personalized exchange: entry `j` of `values` goes to rank `j`; the result holds
    /// one entry per sender, indexed by sender rank.
    pub async fn all_to_all<T: Payload>(&self, values: Vec<T>) -> Result<Vec<T>> {
        let sequence = self.next_sequence();
        if values.len() != self.size() {
            return Err(Error::LengthMismatch {
                operation: "all_to_all",
                expected: self.size(),
                actual: values.len(),
            });
        }

        let mut own = None;
        for (dest, value) in values.into_iter().enumerate() {
            if dest == self.rank() {
                own = Some(value);
                continue;
            }
            let frame = self.collective_frame(CollectiveKind::AllToAll, sequence, &value)?;
            self.transport.send(dest, Tag::Collective, frame).await?;
        }

        let mut received = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            if source == self.rank() {
                received.push(own.take().ok_or_else(|| {
                    Error::Protocol("all_to_all lost the local entry".to_string())
                })?);
            } else {
                received.push(
                    self.receive_collective(CollectiveKind::AllToAll, sequence, source)
                        .await?,
                );
            }
        }
        Ok(received)
    }

    /// All-to-one fold with `op`, applied in rank order.
    pub async fn reduce<T>(&self, value: T, op: ReduceOp, root: Rank) -> Result<Gated<T>>
    where
        T: Payload + Reducible,
    {
        let root = self.identity.check_rank(root)?;
        let sequence = self.next_sequence();
        match self
            .collect_at(CollectiveKind::Reduce, sequence, value, root)
            .await?
        {
            Some(values) => Ok(Gated::Executed(op.fold(values)?)),
            None => Ok(Gated::NotExecuted),
        }
    }

    /// All-to-all fold with `op`. Every rank folds the same values in the same order,
    /// so every rank ends with an identical result.
    pub async fn all_reduce<T>(&self, value: T, op: ReduceOp) -> Result<T>
    where
        T: Payload + Reducible,
    {
        let sequence = self.next_sequence();
        let values = self
            .exchange_all(CollectiveKind::AllReduce, sequence, value)
            .await?;
        op.fold(values)
    }

    // --- Helpers ---

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn collective_frame<T: Payload>(
        &self,
        kind: CollectiveKind,
        sequence: u64,
        value: &T,
    ) -> Result<Vec<u8>> {
        encode(&CollectiveFrame {
            kind,
            sequence,
            payload: encode(value)?,
        })
    }

    async fn receive_collective<T: Payload>(
        &self,
        kind: CollectiveKind,
        sequence: u64,
        source: Rank,
    ) -> Result<T> {
        let envelope = self.transport.recv(Some(source), Tag::Collective).await?;
        let frame: CollectiveFrame = decode(&envelope.payload)?;

        if frame.kind != kind || frame.sequence != sequence {
            return Err(Error::CollectiveMismatch {
                expected: format!("{} #{}", kind, sequence),
                found: format!(
                    "{} #{} from rank {}",
                    frame.kind, frame.sequence, envelope.source
                ),
            });
        }

        decode(&frame.payload)
    }

    /// Ships `value` to `root`; `root` returns every value ordered by rank.
    async fn collect_at<T: Payload>(
        &self,
        kind: CollectiveKind,
        sequence: u64,
        value: T,
        root: Rank,
    ) -> Result<Option<Vec<T>>> {
        if self.rank() != root {
            let frame = self.collective_frame(kind, sequence, &value)?;
            self.transport.send(root, Tag::Collective, frame).await?;
            return Ok(None);
        }

        self.collect_from_all(kind, sequence, value).await.map(Some)
    }

    /// Ships `value` to every other rank and collects theirs, ordered by rank.
    async fn exchange_all<T: Payload>(
        &self,
        kind: CollectiveKind,
        sequence: u64,
        value: T,
    ) -> Result<Vec<T>> {
        let frame = self.collective_frame(kind, sequence, &value)?;
        for dest in (0..self.size()).filter(|&dest| dest != self.rank()) {
            self.transport
                .send(dest, Tag::Collective, frame.clone())
                .await?;
        }

        self.collect_from_all(kind, sequence, value).await
    }

    async fn collect_from_all<T: Payload>(
        &self,
        kind: CollectiveKind,
        sequence: u64,
        value: T,
    ) -> Result<Vec<T>> {
        let mut own = Some(value);
        let mut collected = Vec::with_capacity(self.size());

        for source in 0..self.size() {
            if source == self.rank() {
                collected.push(own.take().ok_or_else(|| {
                    Error::Protocol(format!("{} lost the local value", kind))
                })?);
            } else {
                collected.push(self.receive_collective(kind, sequence, source).await?);
            }
        }

        Ok(collected)
    }
}
