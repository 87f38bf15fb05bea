//! Direct peer channels
//!
//! The reference transport is TCP with length-prefixed JSON frames (see
//! [`crate::protocol::codec`]). Each peer accepts at most one inbound
//! connection at a time; a second caller gets a courtesy notice and is
//! dropped after a grace delay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_frame, write_frame};
use crate::protocol::{DirectPayload, HandOffBlock, StreamStatus, ALREADY_CONNECTED};
use crate::transfer::ChunkedSender;

// ─────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────

/// Bidirectional, ordered payload channel between two peers
#[async_trait]
pub trait DirectChannel: Send {
    async fn send(&mut self, payload: &DirectPayload) -> Result<()>;

    /// Next payload, or `None` once the remote end closed
    async fn recv(&mut self) -> Result<Option<DirectPayload>>;
}

/// [`DirectChannel`] over any byte stream
pub struct FramedChannel<S> {
    stream: S,
}

pub type TcpDirectChannel = FramedChannel<TcpStream>;

impl<S> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> DirectChannel for FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &DirectPayload) -> Result<()> {
        write_frame(&mut self.stream, payload).await
    }

    async fn recv(&mut self) -> Result<Option<DirectPayload>> {
        match read_frame(&mut self.stream).await {
            Ok(payload) => Ok(Some(payload)),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Open a direct channel to `address`
pub async fn connect(address: &str, timeout: Duration) -> Result<TcpDirectChannel> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| Error::connection_timeout(address, timeout.as_secs()))?
        .map_err(|e| Error::connection_failed(address, e.to_string()))?;
    stream.set_nodelay(true)?;
    Ok(FramedChannel::new(stream))
}

/// Push `data` as hand-off blocks, then the complete marker.
///
/// Returns the number of data blocks sent.
pub async fn push_hand_off(
    channel: &mut dyn DirectChannel,
    sender: &str,
    data: &[u8],
    block_size: usize,
) -> Result<usize> {
    let mut blocks = 0;
    for block in data.chunks(block_size.max(1)) {
        channel
            .send(&DirectPayload::Decentralized(HandOffBlock {
                sender: sender.to_string(),
                data: block.to_vec(),
                status: StreamStatus::Incomplete,
            }))
            .await?;
        blocks += 1;
    }

    channel
        .send(&DirectPayload::Decentralized(HandOffBlock {
            sender: sender.to_string(),
            data: Vec::new(),
            status: StreamStatus::Complete,
        }))
        .await?;

    Ok(blocks)
}

/// Send every chunk of a chunked transfer; returns the payload size
pub async fn send_transfer(channel: &mut dyn DirectChannel, mut sender: ChunkedSender) -> Result<u64> {
    let total = sender.total_size();
    while let Some(chunk) = sender.next_chunk() {
        channel.send(&DirectPayload::Data(chunk)).await?;
    }
    Ok(total)
}

// ─────────────────────────────────────────────────────────────────
// Admission
// ─────────────────────────────────────────────────────────────────

/// Single inbound connection slot
#[derive(Debug, Clone, Default)]
pub struct DirectSlot {
    occupant: Arc<Mutex<Option<SocketAddr>>>,
}

/// Holds the slot until dropped
#[derive(Debug)]
pub struct SlotGuard {
    slot: DirectSlot,
}

impl DirectSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `remote`; `None` if another connection holds it
    pub fn try_acquire(&self, remote: SocketAddr) -> Option<SlotGuard> {
        let mut occupant = self.occupant.lock();
        if occupant.is_some() {
            return None;
        }
        *occupant = Some(remote);
        Some(SlotGuard { slot: self.clone() })
    }

    pub fn occupant(&self) -> Option<SocketAddr> {
        *self.occupant.lock()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        *self.slot.occupant.lock() = None;
    }
}

// ─────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────

/// Events from the inbound direct channel
#[derive(Debug, Clone, PartialEq)]
pub enum DirectEvent {
    Opened { remote: SocketAddr },
    Received { remote: SocketAddr, payload: DirectPayload },
    Closed { remote: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct DirectListenerOptions {
    /// Sender name on the rejection notice
    pub name: String,
    /// Delay before a rejected connection is closed
    pub reject_grace: Duration,
}

/// Accept inbound direct connections until the task is aborted
pub async fn run_direct_listener(
    listener: TcpListener,
    slot: DirectSlot,
    options: DirectListenerOptions,
    events: mpsc::Sender<DirectEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(remote = %remote, "Incoming direct connection");
                let slot = slot.clone();
                let options = options.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    match slot.try_acquire(remote) {
                        Some(guard) => serve_inbound(stream, remote, guard, events).await,
                        None => reject(stream, remote, &slot, &options).await,
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_inbound(stream: TcpStream, remote: SocketAddr, _guard: SlotGuard, events: mpsc::Sender<DirectEvent>) {
    info!(remote = %remote, "Direct channel opened");
    let _ = events.send(DirectEvent::Opened { remote }).await;

    let mut channel = FramedChannel::new(stream);
    loop {
        match channel.recv().await {
            Ok(Some(payload)) => {
                if events.send(DirectEvent::Received { remote, payload }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(remote = %remote, error = %e, "Direct channel read failed");
                break;
            }
        }
    }

    info!(remote = %remote, "Direct channel closed");
    let _ = events.send(DirectEvent::Closed { remote }).await;
}

async fn reject(stream: TcpStream, remote: SocketAddr, slot: &DirectSlot, options: &DirectListenerOptions) {
    info!(
        remote = %remote,
        occupant = ?slot.occupant(),
        "Direct slot taken, rejecting connection"
    );

    let mut channel = FramedChannel::new(stream);
    if let Err(e) = channel.send(&DirectPayload::text(&options.name, ALREADY_CONNECTED)).await {
        debug!(remote = %remote, error = %e, "Failed to send rejection notice");
    }
    tokio::time::sleep(options.reject_grace).await;
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
