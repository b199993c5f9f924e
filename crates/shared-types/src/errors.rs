//! # Error Types
//!
//! Error taxonomy shared across the Herald crates. None of these are fatal:
//! callers degrade and log.

use thiserror::Error;

/// Failures of the shared record store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The store refused the write for lack of space.
    #[error("Storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },

    /// The backing store could not be reached (I/O, lock, permissions).
    #[error("Shared record store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be serialized for storage.
    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },
}

/// Failures of calls to the upstream notification API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Malformed upstream response: {0}")]
    Decode(String),

    /// The push stream ended or the connection was dropped.
    #[error("Push channel closed")]
    ChannelClosed,
}

/// Rejections of inbound peer-bus frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Message version not supported.
    #[error("Unsupported version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },

    /// The `type` tag names no known message kind.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// The frame is not valid JSON or the payload does not fit its kind.
    #[error("Malformed message: {0}")]
    Malformed(String),
}
