//! Stream relay
//!
//! A stream request is either redirected to the most recently registered
//! peer that already holds the data (decentralized hand-off), or served by
//! reading the file in fixed-size blocks onto the requester's channel.

use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::effect::Effect;
use crate::error::{Error, Result};
use crate::protocol::{ConnectKind, ConnectRequest, ServerMessage, StreamChunk, StreamRequest};
use crate::session::{ChannelHandle, SessionRegistry};
use crate::storage::{DirectoryAccess, FileReader};

/// Decide how to serve a `stream-data` request
pub fn request_stream(registry: &SessionRegistry, channel: &ChannelHandle, request: &StreamRequest) -> Vec<Effect> {
    if let Some(holder) = registry.most_recent_cached(&request.name) {
        info!(
            requestor = %request.name,
            holder = %holder.name,
            path = %request.file_path,
            "Redirecting stream to cached peer"
        );
        return vec![Effect::send(
            &holder.channel,
            ServerMessage::ConnectRequest(ConnectRequest {
                requestor: request.name.clone(),
                payload: json!({ "filePath": request.file_path }),
                kind: ConnectKind::Decentralized,
            }),
        )];
    }

    info!(requestor = %request.name, path = %request.file_path, "Streaming file from server");
    vec![Effect::StreamFile {
        to: channel.clone(),
        requestor: request.name.clone(),
        path: request.file_path.clone(),
    }]
}

/// Read up to `block_size` bytes, short only at end of file
async fn read_block(reader: &mut FileReader, block_size: usize) -> std::io::Result<Vec<u8>> {
    let mut block = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = reader.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    block.truncate(filled);
    Ok(block)
}

/// Push `path` to `to` as incomplete blocks followed by one complete marker.
///
/// Returns the number of payload bytes sent.
pub async fn stream_file(
    directory: &dyn DirectoryAccess,
    path: &str,
    block_size: usize,
    to: &ChannelHandle,
) -> Result<u64> {
    let mut reader = directory.open(path).await?;
    let mut sent = 0u64;

    loop {
        let block = read_block(&mut reader, block_size)
            .await
            .map_err(|e| Error::io_read(path, e))?;
        if block.is_empty() {
            break;
        }

        let len = block.len();
        if !to.deliver_stream(ServerMessage::DataStream(StreamChunk::block(block))).await {
            return Err(Error::ConnectionLost {
                message: format!("channel {} closed during stream", to.id()),
            });
        }
        sent += len as u64;

        if len < block_size {
            break;
        }
    }

    if !to.deliver_stream(ServerMessage::DataStream(StreamChunk::complete())).await {
        return Err(Error::ConnectionLost {
            message: format!("channel {} closed during stream", to.id()),
        });
    }

    debug!(path = %path, bytes = sent, "Stream complete");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Outbound, OutboxReceiver};
    use crate::storage::LocalDirectory;
    use tempfile::TempDir;

    fn drain(rx: &mut OutboxReceiver) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Ok(Outbound::Message(ServerMessage::DataStream(chunk))) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_stream_40k_in_16k_blocks() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..40 * 1024).map(|i| (i % 256) as u8).collect();
        std::fs::write(dir.path().join("clip.bin"), &data).unwrap();

        let local = LocalDirectory::new(dir.path());
        let (channel, mut rx) = ChannelHandle::new(16);

        let sent = stream_file(&local, "clip.bin", 16 * 1024, &channel).await.unwrap();
        assert_eq!(sent, data.len() as u64);

        let chunks = drain(&mut rx);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![16384, 16384, 8192, 0]);
        assert!(chunks[..3].iter().all(|c| !c.is_complete()));
        assert!(chunks[3].is_complete());

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.clone()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_short_block() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("even.bin"), vec![7u8; 32]).unwrap();

        let local = LocalDirectory::new(dir.path());
        let (channel, mut rx) = ChannelHandle::new(16);
        stream_file(&local, "even.bin", 16, &channel).await.unwrap();

        let sizes: Vec<usize> = drain(&mut rx).iter().map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![16, 16, 0]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let local = LocalDirectory::new(dir.path());
        let (channel, mut rx) = ChannelHandle::new(4);

        let err = stream_file(&local, "nope.bin", 16, &channel).await.unwrap_err();
        assert!(matches!(err, Error::IoRead { .. }));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_redirects_to_latest_cached_peer() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = ChannelHandle::new(4);
        let (b, _rx_b) = ChannelHandle::new(4);
        registry.join("a", "addr-a", a.clone());
        registry.mark_cached("a");
        registry.join("b", "addr-b", b.clone());

        let effects = request_stream(
            &registry,
            &b,
            &StreamRequest {
                name: "b".to_string(),
                file_path: "clip.bin".to_string(),
            },
        );

        assert_eq!(
            effects,
            vec![Effect::send(
                &a,
                ServerMessage::ConnectRequest(ConnectRequest {
                    requestor: "b".to_string(),
                    payload: json!({"filePath": "clip.bin"}),
                    kind: ConnectKind::Decentralized,
                })
            )]
        );
    }

    #[test]
    fn test_streams_when_no_cache() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = ChannelHandle::new(4);
        registry.join("a", "addr-a", a.clone());
        // The requester's own cache never counts
        registry.mark_cached("a");

        let effects = request_stream(
            &registry,
            &a,
            &StreamRequest {
                name: "a".to_string(),
                file_path: "clip.bin".to_string(),
            },
        );

        assert_eq!(
            effects,
            vec![Effect::StreamFile {
                to: a.clone(),
                requestor: "a".to_string(),
                path: "clip.bin".to_string(),
            }]
        );
    }
}
