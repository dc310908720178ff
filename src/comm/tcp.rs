//! TCP transport.
//!
//! One OS process per rank, connected as a full mesh. Rank `r` listens on
//! `peers[r]`, dials every lower rank and accepts every higher rank. Each
//! connection opens with a `Hello` frame naming the dialing rank.
//!
//! Frames are a big-endian `u32` length followed by a bincode-encoded `Frame`.
//! One reader task per peer feeds the local mailbox, so TCP's in-order
//! delivery gives the per-pair ordering the collectives rely on.

use super::mailbox::{AbortSignal, Mailbox};
use super::types::{Envelope, Frame, Rank, Tag};
use super::{Communicator, Transport};
use crate::error::{Error, Result};
use crate::roles::identity::ProcessIdentity;

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;
const CONNECT_ATTEMPTS: usize = 12;

pub struct TcpTransport {
    identity: ProcessIdentity,
    /// Write half per peer, indexed by rank; `None` at our own rank.
    writers: Vec<Option<Mutex<OwnedWriteHalf>>>,
    mailbox: Arc<Mailbox>,
    readers: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Binds `peers[rank]` and joins the mesh described by `peers`.
    pub async fn connect(rank: Rank, peers: Vec<SocketAddr>) -> Result<Communicator> {
        let identity = ProcessIdentity::new(rank, peers.len())?;
        let listener = TcpListener::bind(peers[identity.current_rank()]).await?;
        Self::connect_with_listener(rank, listener, peers).await
    }

    /// Joins the mesh using an already bound listener for our own address.
    pub async fn connect_with_listener(
        rank: Rank,
        listener: TcpListener,
        peers: Vec<SocketAddr>,
    ) -> Result<Communicator> {
        let identity = ProcessIdentity::new(rank, peers.len())?;
        let size = identity.world_size();
        let mut streams: HashMap<Rank, TcpStream> = HashMap::new();

        for (peer, addr) in peers.iter().enumerate().take(rank) {
            let mut stream = connect_with_retry(*addr, CONNECT_ATTEMPTS).await?;
            stream.set_nodelay(true)?;
            write_frame(&mut stream, &Frame::Hello { rank, size }).await?;
            tracing::debug!("Rank {} connected to rank {} at {}", rank, peer, addr);
            streams.insert(peer, stream);
        }

        while streams.len() < size - 1 {
            let (mut stream, addr) = listener.accept().await?;
            match read_frame(&mut stream).await? {
                Some(Frame::Hello {
                    rank: peer,
                    size: peer_size,
                }) if peer_size == size && peer > rank && peer < size => {
                    if streams.contains_key(&peer) {
                        return Err(Error::Protocol(format!(
                            "rank {} connected twice (second time from {})",
                            peer, addr
                        )));
                    }
                    stream.set_nodelay(true)?;
                    tracing::debug!("Rank {} accepted rank {} from {}", rank, peer, addr);
                    streams.insert(peer, stream);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected handshake from {}: {:?}",
                        addr, other
                    )));
                }
            }
        }

        let mailbox = Arc::new(Mailbox::new());
        let mut writers: Vec<Option<Mutex<OwnedWriteHalf>>> = (0..size).map(|_| None).collect();
        let mut readers = Vec::with_capacity(size - 1);

        for (peer, stream) in streams {
            let (read_half, write_half) = stream.into_split();
            writers[peer] = Some(Mutex::new(write_half));

            let mailbox = mailbox.clone();
            readers.push(tokio::spawn(async move {
                reader_loop(peer, read_half, mailbox).await;
            }));
        }

        tracing::info!("Rank {} joined a mesh of {} processes", rank, size);

        Ok(Communicator::new(Arc::new(TcpTransport {
            identity,
            writers,
            mailbox,
            readers,
        })))
    }

    async fn write_to(&self, dest: Rank, frame: &Frame) -> Result<()> {
        let writer = self
            .writers
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank {
                rank: dest,
                size: self.identity.world_size(),
            })?;

        let mut writer = writer.lock().await;
        write_frame(&mut *writer, frame).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        if let Some(signal) = self.mailbox.abort_signal() {
            return Err(Error::ProcessAbort {
                origin: signal.origin,
                code: signal.code,
            });
        }

        let envelope = Envelope {
            source: self.identity.current_rank(),
            tag,
            payload,
        };

        if dest == self.identity.current_rank() {
            self.mailbox.deliver(envelope).await;
            return Ok(());
        }

        self.write_to(dest, &Frame::Message(envelope)).await
    }

    async fn recv(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        self.mailbox.take(source, tag).await
    }

    async fn abort_all(&self, code: i32) {
        let origin = self.identity.current_rank();
        self.mailbox.abort(AbortSignal { origin, code });

        for dest in (0..self.identity.world_size()).filter(|&dest| dest != origin) {
            if let Err(e) = self.write_to(dest, &Frame::Abort { origin, code }).await {
                tracing::warn!("Failed to deliver abort to rank {}: {}", dest, e);
            }
        }
    }

    fn abort_signal(&self) -> Option<AbortSignal> {
        self.mailbox.abort_signal()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

async fn reader_loop(peer: Rank, mut reader: OwnedReadHalf, mailbox: Arc<Mailbox>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(Frame::Message(envelope))) => {
                if envelope.source != peer {
                    tracing::warn!(
                        "Dropping message claiming rank {} on connection to rank {}",
                        envelope.source,
                        peer
                    );
                    continue;
                }
                mailbox.deliver(envelope).await;
            }
            Ok(Some(Frame::Abort { origin, code })) => {
                tracing::error!("Rank {} aborted the run (code {})", origin, code);
                mailbox.abort(AbortSignal { origin, code });
                break;
            }
            Ok(Some(Frame::Hello { rank, .. })) => {
                tracing::warn!("Unexpected hello from rank {} after handshake", rank);
            }
            Ok(None) => {
                tracing::debug!("Connection to rank {} closed", peer);
                mailbox.close(peer).await;
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read from rank {}: {}", peer, e);
                mailbox.close(peer).await;
                break;
            }
        }
    }
}

pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(frame)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Transport(format!("frame of {} bytes is too large", bytes.len())))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame; `Ok(None)` means the peer closed the connection cleanly.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}

// --- Connection helpers with backoff ---

async fn connect_with_retry(addr: SocketAddr, attempts: usize) -> Result<TcpStream> {
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(e.into());
                }
                tracing::debug!("Connect to {} failed ({}), retrying", addr, e);
                // Simple jitter so peers starting together do not retry in lockstep
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(Error::Transport("Retry attempts exhausted".to_string()))
}
