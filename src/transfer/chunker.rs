//! Chunked transfer over a direct channel
//!
//! The sender slices a payload into [`TransferChunk`]s; the receiver
//! appends them in arrival order and hands back the whole payload when
//! the last chunk lands. No reordering is attempted: a chunk whose offset
//! does not match the bytes received so far aborts the transfer.

use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::throughput::{Throughput, ThroughputMeter};
use crate::error::{Error, Result};
use crate::protocol::TransferChunk;

// ─────────────────────────────────────────────────────────────────
// Sender
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Sending,
    Complete,
}

/// Splits one payload into chunks, `Idle → Sending → Complete`
#[derive(Debug)]
pub struct ChunkedSender {
    payload: Vec<u8>,
    name: String,
    extension: String,
    chunk_size: usize,
    offset: usize,
    state: SenderState,
}

impl ChunkedSender {
    /// `chunk_size` of zero is treated as one
    pub fn new(
        payload: Vec<u8>,
        name: impl Into<String>,
        extension: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            payload,
            name: name.into(),
            extension: extension.into(),
            chunk_size: chunk_size.max(1),
            offset: 0,
            state: SenderState::Idle,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn total_size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Produce the next chunk, or `None` once complete
    pub fn next_chunk(&mut self) -> Option<TransferChunk> {
        if self.state == SenderState::Complete {
            return None;
        }
        self.state = SenderState::Sending;

        let total = self.payload.len();
        let end = self.offset.saturating_add(self.chunk_size).min(total);
        let is_last_chunk = self.offset.saturating_add(self.chunk_size) >= total;

        let chunk = TransferChunk {
            offset: self.offset as u64,
            total_size: total as u64,
            payload: self.payload[self.offset..end].to_vec(),
            is_last_chunk,
            name: self.name.clone(),
            extension: self.extension.clone(),
        };

        self.offset = end;
        if is_last_chunk {
            self.state = SenderState::Complete;
        }
        Some(chunk)
    }
}

impl Iterator for ChunkedSender {
    type Item = TransferChunk;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}

// ─────────────────────────────────────────────────────────────────
// Receiver
// ─────────────────────────────────────────────────────────────────

/// A fully reassembled payload
#[derive(Debug, Clone)]
pub struct ReceivedPayload {
    pub name: String,
    pub extension: String,
    pub data: Vec<u8>,
    /// Hex SHA-256 of `data`
    pub sha256: String,
    pub throughput: Option<Throughput>,
}

impl ReceivedPayload {
    /// `name.extension`, or just `name` without an extension
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }
}

/// Reassembles chunks from one sender
#[derive(Debug, Default)]
pub struct ChunkReceiver {
    buffer: Vec<u8>,
    name: String,
    extension: String,
    meter: ThroughputMeter,
}

impl ChunkReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes accumulated for the transfer in progress
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk that arrived at `now`.
    ///
    /// Returns the payload when `chunk` is the last one.
    pub fn accept(&mut self, chunk: TransferChunk, now: Instant) -> Result<Option<ReceivedPayload>> {
        if chunk.offset == 0 {
            if !self.buffer.is_empty() {
                warn!(
                    name = %self.name,
                    dropped = self.buffer.len(),
                    "New transfer started before the previous one completed"
                );
            }
            self.buffer.clear();
            self.name = chunk.name.clone();
            self.extension = chunk.extension.clone();
            self.meter.start(now);
        }

        let expected = self.buffer.len() as u64;
        if chunk.offset != expected {
            self.reset();
            return Err(Error::TransferOutOfOrder {
                expected,
                actual: chunk.offset,
            });
        }

        self.buffer.extend_from_slice(&chunk.payload);
        debug!(
            name = %self.name,
            received = self.buffer.len(),
            total = chunk.total_size,
            "Chunk received"
        );

        if !chunk.is_last_chunk {
            return Ok(None);
        }

        let data = std::mem::take(&mut self.buffer);
        let throughput = self.meter.finish(now, data.len() as u64);
        let sha256 = hex::encode(Sha256::digest(&data));

        Ok(Some(ReceivedPayload {
            name: std::mem::take(&mut self.name),
            extension: std::mem::take(&mut self.extension),
            data,
            sha256,
            throughput,
        }))
    }

    /// Discard any partial transfer
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.name.clear();
        self.extension.clear();
        self.meter.reset();
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
