//! Handle to one peer's message channel
//!
//! The handle only owns the sending side of the connection's outbox; the
//! writer task in the listener drains it onto the socket.
//!
//! The outbox has two lanes. Hub replies go on the control lane; relayed
//! stream blocks go on the stream lane. A long download can fill its own
//! lane but never takes room from a `task`, `connect-request` or
//! `smart-data` event, and the writer always drains control frames first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::warn;

use crate::protocol::ServerMessage;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Send a close frame and stop writing
    Close,
}

/// Sending half of a connection, compared by id
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    control: mpsc::Sender<Outbound>,
    stream: mpsc::Sender<ServerMessage>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer task drains.
    ///
    /// Each lane holds up to `capacity` frames.
    pub fn new(capacity: usize) -> (Self, OutboxReceiver) {
        let capacity = capacity.max(1);
        let (control, control_rx) = mpsc::channel(capacity);
        let (stream, stream_rx) = mpsc::channel(capacity);
        (
            Self {
                id: ChannelId::next(),
                control,
                stream,
            },
            OutboxReceiver {
                control: control_rx,
                stream: stream_rx,
            },
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue on the control lane without waiting.
    ///
    /// Used from the hub, which must never block on one slow peer. A full or
    /// closed lane drops the frame and returns false.
    pub fn try_deliver(&self, outbound: Outbound) -> bool {
        match self.control.try_send(outbound) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel = %self.id, "Outbox full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a stream block and wait for room; fails once the connection is gone
    pub async fn deliver_stream(&self, message: ServerMessage) -> bool {
        self.stream.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Receiving side of a connection's outbox
#[derive(Debug)]
pub struct OutboxReceiver {
    control: mpsc::Receiver<Outbound>,
    stream: mpsc::Receiver<ServerMessage>,
}

impl OutboxReceiver {
    /// Next frame, control lane first; `None` once both lanes are closed
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            Some(frame) = self.control.recv() => Some(frame),
            Some(message) = self.stream.recv() => Some(Outbound::Message(message)),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        match self.control.try_recv() {
            Ok(frame) => Ok(frame),
            Err(control) => match self.stream.try_recv() {
                Ok(message) => Ok(Outbound::Message(message)),
                Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
                Err(TryRecvError::Disconnected) => Err(control),
            },
        }
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelHandle {}
