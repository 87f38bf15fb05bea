//! Local cache of received data
//!
//! Holds the one stream a peer requested (from the server relay or a
//! hand-off), plus smart data items and direct transfers written to disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{HandOffBlock, SmartDataItem, StreamChunk};
use crate::transfer::ReceivedPayload;

const STREAMS_DIR: &str = "streams";
const SMART_DATA_DIR: &str = "smart-data";
const TRANSFERS_DIR: &str = "transfers";

/// Last path component of `name`, or `fallback` if there is none
fn file_component(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "..")
        .unwrap_or_else(|| fallback.to_string())
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    tokio::fs::write(path, data).await.map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug)]
struct PendingStream {
    file_path: String,
    data: Vec<u8>,
}

/// A fully received stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStream {
    /// Path as requested from the server
    pub file_path: String,
    /// Where the bytes were written
    pub stored_at: PathBuf,
}

#[derive(Debug)]
pub struct StreamCache {
    dir: PathBuf,
    pending: Option<PendingStream>,
    cached: Option<CachedStream>,
}

impl StreamCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: None,
            cached: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Note a requested stream; its blocks may come from either source
    pub fn expect_stream(&mut self, file_path: impl Into<String>) {
        self.pending = Some(PendingStream {
            file_path: file_path.into(),
            data: Vec::new(),
        });
    }

    /// Append a relayed block; returns the cached stream once complete
    pub async fn accept_relay_block(&mut self, chunk: StreamChunk) -> Result<Option<CachedStream>> {
        let complete = chunk.is_complete();
        self.append(chunk.payload, complete).await
    }

    /// Append a hand-off block from another peer
    pub async fn accept_hand_off(&mut self, block: HandOffBlock) -> Result<Option<CachedStream>> {
        let complete = block.status == crate::protocol::StreamStatus::Complete;
        debug!(sender = %block.sender, bytes = block.data.len(), complete, "Hand-off block");
        self.append(block.data, complete).await
    }

    async fn append(&mut self, data: Vec<u8>, complete: bool) -> Result<Option<CachedStream>> {
        let pending = self.pending.get_or_insert_with(|| {
            warn!("Stream data arrived without a request, caching as unnamed stream");
            PendingStream {
                file_path: String::new(),
                data: Vec::new(),
            }
        });
        pending.data.extend_from_slice(&data);

        if !complete {
            return Ok(None);
        }

        let Some(finished) = self.pending.take() else {
            return Ok(None);
        };
        let stored_at = self
            .dir
            .join(STREAMS_DIR)
            .join(file_component(&finished.file_path, "stream.bin"));
        write_file(&stored_at, &finished.data).await?;

        info!(
            path = %finished.file_path,
            bytes = finished.data.len(),
            stored = %stored_at.display(),
            "Stream cached"
        );

        let cached = CachedStream {
            file_path: finished.file_path,
            stored_at,
        };
        self.cached = Some(cached.clone());
        Ok(Some(cached))
    }

    pub fn cached(&self) -> Option<&CachedStream> {
        self.cached.as_ref()
    }

    /// Stored copy of `file_path`, if that is the stream held
    pub fn cached_for(&self, file_path: &str) -> Option<&Path> {
        self.cached
            .as_ref()
            .filter(|c| c.file_path == file_path)
            .map(|c| c.stored_at.as_path())
    }

    /// Forget the cached stream and any partial one
    pub fn clear(&mut self) {
        if let Some(cached) = self.cached.take() {
            debug!(path = %cached.file_path, "Cleared cached stream");
        }
        self.pending = None;
    }

    pub async fn store_smart_data(&self, item: &SmartDataItem) -> Result<PathBuf> {
        let path = self
            .dir
            .join(SMART_DATA_DIR)
            .join(file_component(&item.resolution, "default"))
            .join(file_component(&item.filename, &format!("item-{}", item.index)));
        write_file(&path, &item.payload).await?;
        Ok(path)
    }

    pub async fn store_transfer(&self, payload: &ReceivedPayload) -> Result<PathBuf> {
        let path = self
            .dir
            .join(TRANSFERS_DIR)
            .join(file_component(&payload.file_name(), "transfer.bin"));
        write_file(&path, &payload.data).await?;
        Ok(path)
    }
}
