//! # Peer Message Envelope
//!
//! Every frame on the peer bus is a `PeerMessage`: a versioned envelope
//! naming its origin peer, wrapping one of a closed set of message bodies.
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "version": 1,
//!   "fromPeerId": "peer-3f2a...",
//!   "sentAt": 1718000000000,
//!   "body": { "type": "LEADER_HEARTBEAT", "payload": { "peerId": "peer-3f2a..." } }
//! }
//! ```
//!
//! Decoding is strict: an unknown `type`, a payload that does not fit its
//! kind, or an unsupported `version` are all rejected with a `MessageError`.

use crate::entities::{NotificationRecord, PeerId, Timestamp};
use crate::errors::MessageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Current peer protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// The closed set of inter-peer messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    /// Proof of an active leader.
    #[serde(rename_all = "camelCase")]
    LeaderHeartbeat { peer_id: PeerId },

    /// A peer announces candidacy after finding the leader slot free.
    #[serde(rename_all = "camelCase")]
    LeaderElection { peer_id: PeerId },

    /// The named peer went to the background and gave up leadership.
    #[serde(rename_all = "camelCase")]
    TabInactive { peer_id: PeerId },

    /// The leader's upstream channel opened or closed.
    ConnectionStatus { connected: bool },

    /// The leader ingested a genuinely new record.
    NewNotification { record: NotificationRecord },

    /// Full store state after a mark-read or refresh.
    #[serde(rename_all = "camelCase")]
    NotificationUpdate {
        records: Vec<NotificationRecord>,
        unread_count: u64,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::LeaderHeartbeat { .. } => MessageKind::LeaderHeartbeat,
            MessageBody::LeaderElection { .. } => MessageKind::LeaderElection,
            MessageBody::TabInactive { .. } => MessageKind::TabInactive,
            MessageBody::ConnectionStatus { .. } => MessageKind::ConnectionStatus,
            MessageBody::NewNotification { .. } => MessageKind::NewNotification,
            MessageBody::NotificationUpdate { .. } => MessageKind::NotificationUpdate,
        }
    }
}

/// Discriminant of `MessageBody`, used for filtering, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    LeaderHeartbeat,
    LeaderElection,
    TabInactive,
    ConnectionStatus,
    NewNotification,
    NotificationUpdate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::LeaderHeartbeat,
        MessageKind::LeaderElection,
        MessageKind::TabInactive,
        MessageKind::ConnectionStatus,
        MessageKind::NewNotification,
        MessageKind::NotificationUpdate,
    ];

    /// The wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::LeaderHeartbeat => "LEADER_HEARTBEAT",
            MessageKind::LeaderElection => "LEADER_ELECTION",
            MessageKind::TabInactive => "TAB_INACTIVE",
            MessageKind::ConnectionStatus => "CONNECTION_STATUS",
            MessageKind::NewNotification => "NEW_NOTIFICATION",
            MessageKind::NotificationUpdate => "NOTIFICATION_UPDATE",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioned envelope around a `MessageBody`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    pub version: u16,
    /// Origin peer; receivers drop their own frames by this field.
    pub from_peer_id: PeerId,
    pub sent_at: Timestamp,
    pub body: MessageBody,
}

impl PeerMessage {
    pub fn new(from_peer_id: PeerId, sent_at: Timestamp, body: MessageBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            from_peer_id,
            sent_at,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_from(&self, peer_id: &PeerId) -> bool {
        &self.from_peer_id == peer_id
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    /// Strict decode. Checks the version and the kind tag before the
    /// payload so each failure maps to a distinct error.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let raw: Value =
            serde_json::from_slice(bytes).map_err(|e| MessageError::Malformed(e.to_string()))?;

        let version = raw
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| MessageError::Malformed("missing version".to_string()))?;
        if version != u64::from(PROTOCOL_VERSION) {
            return Err(MessageError::UnsupportedVersion {
                received: u16::try_from(version).unwrap_or(u16::MAX),
                supported: PROTOCOL_VERSION,
            });
        }

        let tag = raw
            .get("body")
            .and_then(|body| body.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing body type".to_string()))?;
        if MessageKind::from_tag(tag).is_none() {
            return Err(MessageError::UnknownKind(tag.to_string()));
        }

        serde_json::from_value(raw).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}
