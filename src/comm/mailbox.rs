//! Per-rank inbox with selective receive.
//!
//! Transports push every inbound `Envelope` here; receivers pull the oldest
//! envelope matching `(source, tag)`. Scanning front-to-back keeps the
//! per-sender order intact even when other traffic is interleaved.
//!
//! A source whose connection closed can never deliver again: a receive that
//! names it fails once its queued envelopes are used up.

use super::types::{Envelope, Rank, Tag};
use crate::error::{Error, Result};

use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortSignal {
    pub origin: Rank,
    pub code: i32,
}

pub struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    aborted: OnceLock<AbortSignal>,
    closed: Mutex<HashSet<Rank>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            aborted: OnceLock::new(),
            closed: Mutex::new(HashSet::new()),
        }
    }

    pub async fn deliver(&self, envelope: Envelope) {
        tracing::trace!(
            "Mailbox received {} bytes from rank {} ({:?})",
            envelope.payload.len(),
            envelope.source,
            envelope.tag
        );
        self.queue.lock().await.push_back(envelope);
        self.notify.notify_waiters();
    }

    /// Marks the mailbox aborted. The first signal wins; later ones are ignored.
    pub fn abort(&self, signal: AbortSignal) {
        if self.aborted.set(signal).is_ok() {
            tracing::debug!(
                "Mailbox aborted by rank {} (code {})",
                signal.origin,
                signal.code
            );
        }
        self.notify.notify_waiters();
    }

    /// Records that `source` will not deliver anything more.
    pub async fn close(&self, source: Rank) {
        self.closed.lock().await.insert(source);
        self.notify.notify_waiters();
    }

    pub fn abort_signal(&self) -> Option<AbortSignal> {
        self.aborted.get().copied()
    }

    /// Waits for the oldest envelope matching `tag` and, if given, `source`.
    ///
    /// Fails with `ProcessAbort` as soon as the mailbox is aborted, even if a
    /// matching envelope is already queued. Fails with `Transport` when
    /// `source` is closed and nothing from it matches.
    pub async fn take(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        loop {
            // Register interest before checking so a delivery between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(signal) = self.abort_signal() {
                return Err(Error::ProcessAbort {
                    origin: signal.origin,
                    code: signal.code,
                });
            }

            {
                let mut queue = self.queue.lock().await;
                let position = queue.iter().position(|envelope| {
                    envelope.tag == tag && source.is_none_or(|rank| envelope.source == rank)
                });
                if let Some(index) = position
                    && let Some(envelope) = queue.remove(index)
                {
                    return Ok(envelope);
                }
            }

            if let Some(rank) = source
                && self.closed.lock().await.contains(&rank)
            {
                return Err(Error::Transport(format!(
                    "connection to rank {} closed while waiting for {:?}",
                    rank, tag
                )));
            }

            notified.await;
        }
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
