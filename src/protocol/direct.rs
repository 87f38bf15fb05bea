//! Direct-channel payloads exchanged peer to peer
//!
//! The server never sees these. Each frame is a JSON object tagged by
//! `usecase`: `message`, `decentralized` or `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::base64_bytes;
use super::messages::StreamStatus;

/// Notice sent to a second inbound connection before it is closed
pub const ALREADY_CONNECTED: &str = "Already connected to another client";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "usecase", rename_all = "lowercase")]
pub enum DirectPayload {
    /// Free-form collaborative message
    Message(DirectMessage),

    /// Relay block pushed by a peer that cached the stream
    Decentralized(HandOffBlock),

    /// One chunk of a chunked transfer
    Data(TransferChunk),
}

impl DirectPayload {
    pub fn usecase(&self) -> &'static str {
        match self {
            DirectPayload::Message(_) => "message",
            DirectPayload::Decentralized(_) => "decentralized",
            DirectPayload::Data(_) => "data",
        }
    }

    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        DirectPayload::Message(DirectMessage {
            sender: sender.into(),
            data: Value::String(text.into()),
        })
    }

    /// Whether this is the courtesy notice of a rejected connection
    pub fn is_rejection(&self) -> bool {
        matches!(self, DirectPayload::Message(m) if m.data.as_str() == Some(ALREADY_CONNECTED))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub sender: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandOffBlock {
    pub sender: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub status: StreamStatus,
}

/// One slice of a payload sent over a direct channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunk {
    /// Byte offset of this slice in the whole payload
    pub offset: u64,
    pub total_size: u64,
    #[serde(rename = "data", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub is_last_chunk: bool,
    pub name: String,
    pub extension: String,
}
