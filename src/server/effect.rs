//! Side effects returned by request handlers
//!
//! Handlers never write to sockets themselves; the hub executes the
//! effects after the handler returns.

use crate::protocol::ServerMessage;
use crate::session::ChannelHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Queue an event on a peer's channel
    Send {
        to: ChannelHandle,
        message: ServerMessage,
    },

    /// Close a peer's channel after everything already queued
    Close { channel: ChannelHandle },

    /// Relay a file in blocks from a background task
    StreamFile {
        to: ChannelHandle,
        requestor: String,
        path: String,
    },
}

impl Effect {
    pub fn send(to: &ChannelHandle, message: ServerMessage) -> Self {
        Effect::Send {
            to: to.clone(),
            message,
        }
    }
}
