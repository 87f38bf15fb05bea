//! Wire helpers shared by both channels
//!
//! - `base64_bytes`: serde adapter so binary payloads travel as base64 strings
//! - length-prefixed JSON framing for the TCP direct channel
//!
//! Frame format:  [4-byte big-endian length][JSON payload]

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame accepted on a direct channel
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Serialize `Vec<u8>` as a standard base64 string
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncReadExt + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::MessageTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| Error::malformed(e.to_string()))
}

/// Write one length-prefixed JSON frame and flush
pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_vec(message).map_err(|e| Error::malformed(e.to_string()))?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(Error::MessageTooLarge {
            size: json.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    writer.write_u32(json.len() as u32).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}
