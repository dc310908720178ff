//! In-memory transport.
//!
//! Runs every rank of a run inside one process: each rank gets its own
//! `Communicator`, and a send is a push into the destination's mailbox.
//! `run_local` spawns one tokio task per rank and joins them. A rank whose
//! task panics aborts the mesh, and no rank reports success for a run that
//! was aborted.

use super::mailbox::{AbortSignal, Mailbox};
use super::types::{Envelope, Rank, Tag};
use super::{Communicator, Transport};
use crate::abort;
use crate::error::{Error, Result};
use crate::roles::identity::ProcessIdentity;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

pub struct LocalTransport {
    identity: ProcessIdentity,
    mailboxes: Arc<[Mailbox]>,
}

impl LocalTransport {
    /// Creates a connected mesh of `size` ranks, returned in rank order.
    pub fn cluster(size: usize) -> Result<Vec<Communicator>> {
        if size == 0 {
            return Err(Error::InvalidIdentity { rank: 0, size });
        }

        let mailboxes: Arc<[Mailbox]> = (0..size).map(|_| Mailbox::new()).collect();

        (0..size)
            .map(|rank| {
                let transport = LocalTransport {
                    identity: ProcessIdentity::new(rank, size)?,
                    mailboxes: mailboxes.clone(),
                };
                Ok(Communicator::new(Arc::new(transport)))
            })
            .collect()
    }

    fn own_mailbox(&self) -> &Mailbox {
        &self.mailboxes[self.identity.current_rank()]
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        if let Some(signal) = self.own_mailbox().abort_signal() {
            return Err(Error::ProcessAbort {
                origin: signal.origin,
                code: signal.code,
            });
        }

        let mailbox = self.mailboxes.get(dest).ok_or(Error::InvalidRank {
            rank: dest,
            size: self.identity.world_size(),
        })?;

        mailbox
            .deliver(Envelope {
                source: self.identity.current_rank(),
                tag,
                payload,
            })
            .await;

        Ok(())
    }

    async fn recv(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        self.own_mailbox().take(source, tag).await
    }

    async fn abort_all(&self, code: i32) {
        let signal = AbortSignal {
            origin: self.identity.current_rank(),
            code,
        };
        for mailbox in self.mailboxes.iter() {
            mailbox.abort(signal);
        }
    }

    fn abort_signal(&self) -> Option<AbortSignal> {
        self.own_mailbox().abort_signal()
    }
}

/// Runs `node` once per rank of a fresh in-memory mesh and returns each rank's
/// outcome in rank order.
///
/// If any rank aborted the run, every rank's outcome is `ProcessAbort`, even
/// for ranks that finished before the abort was raised.
pub async fn run_local<T, F, Fut>(size: usize, node: F) -> Result<Vec<Result<T>>>
where
    F: Fn(Communicator) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let communicators = LocalTransport::cluster(size)?;
    tracing::debug!("Starting {} local ranks", size);

    let handles: Vec<_> = communicators
        .iter()
        .map(|communicator| {
            let rank_task = tokio::spawn(node(communicator.clone()));
            let communicator = communicator.clone();
            tokio::spawn(async move {
                match rank_task.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let error = Error::Transport(format!(
                            "rank {} terminated unexpectedly: {}",
                            communicator.rank(),
                            e
                        ));
                        Err(abort::escalate(&communicator, error).await)
                    }
                }
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(size);
    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(Err(Error::Transport(format!(
                "rank {} supervisor failed: {}",
                rank, e
            )))),
        }
    }

    // Every rank has stopped, so any abort is visible in every mailbox by now.
    for (outcome, communicator) in outcomes.iter_mut().zip(&communicators) {
        if outcome.is_ok()
            && let Err(aborted) = communicator.check_aborted()
        {
            *outcome = Err(aborted);
        }
    }

    Ok(outcomes)
}
