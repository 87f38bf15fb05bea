//! Error types for fieldmesh
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing and the `error` wire event
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for fieldmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    DirectChannelClosed = 305,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    ProtocolUnexpected = 402,
    MalformedRequest = 403,
    TransferOutOfOrder = 404,
    MessageTooLarge = 405,

    // Coordination errors (5xx)
    NameTaken = 500,
    PeerNotFound = 501,
    NoTasksConfigured = 502,
    MalformedResult = 503,
    ResolutionNotFound = 504,
    SmartDataInactive = 505,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Numeric value carried by the `error` event
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Coordination errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File or directory read error
    #[error("Failed to read {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Connection failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Connection timeout
    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    /// Connection lost
    #[error("Lost connection to server: {message}")]
    ConnectionLost { message: String },

    /// Direct peer channel closed under us
    #[error("Direct channel to {peer} closed")]
    DirectChannelClosed { peer: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Message arrived in a state that does not accept it
    #[error("Unexpected message: {message}")]
    ProtocolUnexpected { message: String },

    /// Well-formed message with invalid arguments
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// Chunk offset does not match the bytes received so far
    #[error("Transfer chunk out of order: expected offset {expected}, got {actual}")]
    TransferOutOfOrder { expected: u64, actual: u64 },

    /// Frame exceeds the configured limit
    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    // ─────────────────────────────────────────────────────────────
    // Coordination Errors
    // ─────────────────────────────────────────────────────────────

    /// Another session already holds the name
    #[error("Peer name already taken: {name}")]
    NameTaken { name: String },

    /// No registered session with this name
    #[error("Peer not found: {name}")]
    PeerNotFound { name: String },

    /// Task pool is empty
    #[error("No tasks configured")]
    NoTasksConfigured,

    /// Task result is not a JSON array
    #[error("Malformed task result from {peer}: {message}")]
    MalformedResult { peer: String, message: String },

    /// Requested resolution not present in the discovered catalog
    #[error("Resolution '{resolution}' not found under {source_path}")]
    ResolutionNotFound {
        resolution: String,
        source_path: PathBuf,
    },

    /// Update requested while no smart data sharing has been started
    #[error("Smart data sharing has not been started")]
    SmartDataInactive,

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::DirectChannelClosed { .. } => ErrorCode::DirectChannelClosed,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::ProtocolUnexpected { .. } => ErrorCode::ProtocolUnexpected,
            Error::MalformedRequest { .. } => ErrorCode::MalformedRequest,
            Error::TransferOutOfOrder { .. } => ErrorCode::TransferOutOfOrder,
            Error::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,

            Error::NameTaken { .. } => ErrorCode::NameTaken,
            Error::PeerNotFound { .. } => ErrorCode::PeerNotFound,
            Error::NoTasksConfigured => ErrorCode::NoTasksConfigured,
            Error::MalformedResult { .. } => ErrorCode::MalformedResult,
            Error::ResolutionNotFound { .. } => ErrorCode::ResolutionNotFound,
            Error::SmartDataInactive => ErrorCode::SmartDataInactive,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::WebSocket(_)
                | Error::Io(_)
        )
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::NameTaken { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'fieldmesh config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'fieldmesh config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::IoRead { .. } => Some(
                "Check that the path exists on the server and is readable."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the server URL is correct."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The server may be down or unreachable. Check your firewall settings."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. The peer will automatically attempt to reconnect."
            ),

            Error::NameTaken { .. } => Some(
                "Pick a different peer name with '--name'."
            ),
            Error::PeerNotFound { .. } => Some(
                "The peer may have disconnected. Request a fresh peer list and retry."
            ),
            Error::NoTasksConfigured => Some(
                "Set '[tasks] file' in the server configuration and send SIGHUP to reload."
            ),
            Error::ResolutionNotFound { .. } => Some(
                "Use 'list-files' on the source path to see the available resolutions."
            ),
            Error::SmartDataInactive => Some(
                "Send 'start-smart-data-sharing' before updating it."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }

    /// Message text sent to a peer in an `error` event.
    ///
    /// Includes the source chain, since the peer cannot see server logs.
    pub fn wire_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a read error for a path
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a connection timeout error
    pub fn connection_timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        Error::ConnectionTimeout {
            url: url.into(),
            timeout_secs,
        }
    }

    /// Create a malformed protocol message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            message: message.into(),
        }
    }

    /// Create a malformed request error
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Error::MalformedRequest {
            message: message.into(),
        }
    }

    /// Create a peer not found error
    pub fn peer_not_found(name: impl Into<String>) -> Self {
        Error::PeerNotFound { name: name.into() }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::ConnectionFailed.as_str(), "E300");
        assert_eq!(ErrorCode::PeerNotFound.as_str(), "E501");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::ConnectionFailed.exit_code(), 30);
        assert_eq!(ErrorCode::TransferOutOfOrder.exit_code(), 40);
        assert_eq!(ErrorCode::NameTaken.exit_code(), 50);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_error_display() {
        let err = Error::ConfigNotFound {
            path: PathBuf::from("/path/to/config.toml"),
            source: None,
        };
        assert!(err.to_string().contains("/path/to/config.toml"));

        let err = Error::TransferOutOfOrder { expected: 16, actual: 32 };
        assert!(err.to_string().contains("expected offset 16"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::config_not_found("/test").code(), ErrorCode::ConfigNotFound);
        assert_eq!(
            Error::connection_failed("ws://test", "refused").code(),
            ErrorCode::ConnectionFailed
        );
        assert_eq!(Error::peer_not_found("b").code(), ErrorCode::PeerNotFound);
        assert_eq!(Error::NoTasksConfigured.code(), ErrorCode::NoTasksConfigured);
        assert_eq!(Error::SmartDataInactive.code(), ErrorCode::SmartDataInactive);
        assert_eq!(
            Error::malformed_request("period must be at least 1").code(),
            ErrorCode::MalformedRequest
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::connection_failed("url", "test").is_retryable());
        assert!(Error::ConnectionTimeout { url: "url".into(), timeout_secs: 30 }.is_retryable());
        assert!(!Error::config_not_found("/test").is_retryable());
        assert!(!Error::NameTaken { name: "a".into() }.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::config_not_found("/test").is_fatal());
        assert!(!Error::peer_not_found("a").is_fatal());
        assert!(Error::NameTaken { name: "a".into() }.is_fatal());
        assert!(!Error::connection_failed("url", "test").is_fatal());
    }

    #[test]
    fn test_error_suggestions() {
        let err = Error::config_not_found("/test");
        assert!(err.suggestion().unwrap().contains("config init"));

        let err = Error::NoTasksConfigured;
        assert!(err.suggestion().unwrap().contains("[tasks]"));
    }

    #[test]
    fn test_format_for_terminal() {
        let err = Error::config_not_found("/test/config.toml");
        let formatted = err.format_for_terminal();

        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let err = Error::config_not_found("/test/config.toml");
        let formatted = err.format_for_log();

        assert!(formatted.contains("[E100]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_wire_message_includes_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::io_read("/data/a.bin", io_err);

        let message = err.wire_message();
        assert!(message.contains("/data/a.bin"));
        assert!(message.contains("no such file"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
