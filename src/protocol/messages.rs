//! Message-channel events
//!
//! Every WebSocket text frame carries one JSON object with an `"event"`
//! discriminator and camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::base64_bytes;
use crate::error::{Error, ErrorCode};

// ─────────────────────────────────────────────────────────────────
// Peer → Server
// ─────────────────────────────────────────────────────────────────

/// Requests a peer sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask whether a name is free
    ValidateUsername(NameRequest),

    /// Register (or re-register) a session
    Join(JoinRequest),

    /// Ask for a file stream
    StreamData(StreamRequest),

    /// Ask the server to broadcast the peer list
    PeersList(NameRequest),

    /// Ask the server to forward a connection request
    RequestPeer(PeerConnectRequest),

    /// Resolve a peer's direct address
    PeerId(NameRequest),

    /// Start periodic smart data pushes
    StartSmartDataSharing(SmartDataStart),

    /// Restart smart data pushes with new parameters
    UpdateSmartDataSharing(SmartDataUpdate),

    /// Ask for a task
    GetTask(NameRequest),

    /// Submit a task result
    TaskResult(TaskResultSubmit),

    /// List the files in a server directory
    ListFiles(ListFilesRequest),
}

impl ClientMessage {
    /// Event name, as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::ValidateUsername(_) => "validate-username",
            ClientMessage::Join(_) => "join",
            ClientMessage::StreamData(_) => "stream-data",
            ClientMessage::PeersList(_) => "peers-list",
            ClientMessage::RequestPeer(_) => "request-peer",
            ClientMessage::PeerId(_) => "peer-id",
            ClientMessage::StartSmartDataSharing(_) => "start-smart-data-sharing",
            ClientMessage::UpdateSmartDataSharing(_) => "update-smart-data-sharing",
            ClientMessage::GetTask(_) => "get-task",
            ClientMessage::TaskResult(_) => "task-result",
            ClientMessage::ListFiles(_) => "list-files",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub name: String,
    /// Address other peers use to open a direct channel
    pub direct_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnectRequest {
    pub requestor_name: String,
    pub receiver_name: String,
    /// Opaque to the server
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartDataStart {
    pub name: String,
    pub source_path: String,
    pub resolution: String,
    pub period_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartDataUpdate {
    pub name: String,
    pub resolution: String,
    pub period_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultSubmit {
    pub name: String,
    pub task: Value,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesRequest {
    pub name: String,
    pub path: String,
}

// ─────────────────────────────────────────────────────────────────
// Server → Peer
// ─────────────────────────────────────────────────────────────────

/// Events the server sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    ValidUsername(ValidUsername),

    /// One block of a relayed file
    DataStream(StreamChunk),

    Peers(PeerList),

    /// Instruction to accept or open a direct channel
    ConnectRequest(ConnectRequest),

    PeerIdValue(PeerAddress),

    SmartData(SmartDataItem),

    Task(TaskAssignment),

    FileList(FileList),

    /// Best-effort hint that a peer left and cached data may be stale
    ClearCache,

    Error(ErrorEvent),
}

impl ServerMessage {
    /// Event name, as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::ValidUsername(_) => "valid-username",
            ServerMessage::DataStream(_) => "data-stream",
            ServerMessage::Peers(_) => "peers",
            ServerMessage::ConnectRequest(_) => "connect-request",
            ServerMessage::PeerIdValue(_) => "peer-id-value",
            ServerMessage::SmartData(_) => "smart-data",
            ServerMessage::Task(_) => "task",
            ServerMessage::FileList(_) => "file-list",
            ServerMessage::ClearCache => "clear-cache",
            ServerMessage::Error(_) => "error",
        }
    }

    /// Build the `error` event for a failed request
    pub fn error(err: &Error) -> Self {
        ServerMessage::Error(ErrorEvent {
            code: err.code().as_u16(),
            message: err.wire_message(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidUsername {
    pub valid: bool,
}

/// Progress marker on a relayed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Incomplete,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub status: StreamStatus,
}

impl StreamChunk {
    pub fn block(payload: Vec<u8>) -> Self {
        Self {
            payload,
            status: StreamStatus::Incomplete,
        }
    }

    /// Terminal marker with an empty payload
    pub fn complete() -> Self {
        Self {
            payload: Vec::new(),
            status: StreamStatus::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == StreamStatus::Complete
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerList {
    pub peers: Vec<String>,
}

/// Why a direct channel is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectKind {
    /// Peer-initiated collaboration; payload is opaque
    Collaborative,
    /// Stream hand-off to a peer holding cached data; payload is `{filePath}`
    Decentralized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub requestor: String,
    pub payload: Value,
    pub kind: ConnectKind,
}

/// Payload of a decentralized `connect-request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHandOff {
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAddress {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartDataItem {
    pub resolution: String,
    pub index: usize,
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub path: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Numeric [`ErrorCode`]
    pub code: u16,
    pub message: String,
}

impl ErrorEvent {
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_u16()
    }
}

// ─────────────────────────────────────────────────────────────────
// Serialization Helpers
// ─────────────────────────────────────────────────────────────────

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_wire_shape() {
        let msg = ClientMessage::Join(JoinRequest {
            name: "a".to_string(),
            direct_address: "10.0.0.5:7000".to_string(),
        });

        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"event": "join", "name": "a", "directAddress": "10.0.0.5:7000"})
        );
    }

    #[test]
    fn test_parse_smart_data_start() {
        let json = r#"{
            "event": "start-smart-data-sharing",
            "name": "a",
            "sourcePath": "/srv/images",
            "resolution": "r2",
            "periodSeconds": 3
        }"#;

        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::StartSmartDataSharing(req) => {
                assert_eq!(req.source_path, "/srv/images");
                assert_eq!(req.resolution, "r2");
                assert_eq!(req.period_seconds, 3);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_request_peer_payload_defaults_to_null() {
        let json = r#"{"event":"request-peer","requestorName":"a","receiverName":"b"}"#;

        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::RequestPeer(req) => {
                assert_eq!(req.receiver_name, "b");
                assert_eq!(req.payload, Value::Null);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientMessage::from_json(r#"{"event":"reboot","name":"a"}"#).is_err());
    }

    #[test]
    fn test_data_stream_payload_is_base64() {
        let msg = ServerMessage::DataStream(StreamChunk::block(b"abc".to_vec()));
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({"event": "data-stream", "payload": "YWJj", "status": "incomplete"})
        );
    }

    #[test]
    fn test_complete_marker_has_empty_payload() {
        let json = ServerMessage::DataStream(StreamChunk::complete()).to_json().unwrap();
        assert!(json.contains(r#""payload":"""#));
        assert!(json.contains(r#""status":"complete""#));
    }

    #[test]
    fn test_clear_cache_is_bare_event() {
        let json = ServerMessage::ClearCache.to_json().unwrap();
        assert_eq!(json, r#"{"event":"clear-cache"}"#);
        assert_eq!(ServerMessage::from_json(&json).unwrap(), ServerMessage::ClearCache);
    }

    #[test]
    fn test_connect_request_kind() {
        let msg = ServerMessage::ConnectRequest(ConnectRequest {
            requestor: "b".to_string(),
            payload: json!({"filePath": "/data/x"}),
            kind: ConnectKind::Decentralized,
        });
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "decentralized");

        let hand_off: StreamHandOff = serde_json::from_value(value["payload"].clone()).unwrap();
        assert_eq!(hand_off.file_path, "/data/x");
    }

    #[test]
    fn test_error_event_from_error() {
        let msg = ServerMessage::error(&Error::peer_not_found("ghost"));
        match msg {
            ServerMessage::Error(event) => {
                assert!(event.is(ErrorCode::PeerNotFound));
                assert!(event.message.contains("ghost"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_event_names_match_wire() {
        let msg = ServerMessage::PeerIdValue(PeerAddress {
            name: "a".to_string(),
            address: "1.2.3.4:5".to_string(),
        });
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], msg.event_name());

        let msg = ClientMessage::UpdateSmartDataSharing(SmartDataUpdate {
            name: "a".to_string(),
            resolution: "r1".to_string(),
            period_seconds: 1,
        });
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], msg.event_name());
    }
}
