//! # Domain Entities
//!
//! The peer data model: identities, timestamps, notification records, the
//! leader slot kept in the shared record store, and the connection state
//! reported by the leader.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Payload key the upstream sets on records addressed to a different
/// audience class than the signed-in user.
pub const RESTRICTED_AUDIENCE_KEY: &str = "forDriver";

// =============================================================================
// IDENTITY & TIME
// =============================================================================

/// Opaque, process-lifetime-unique peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(format!("peer-{}", Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Time elapsed since `earlier`; zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// NOTIFICATION RECORDS
// =============================================================================

/// Notification priority. Declaration order is rank order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Numeric rank: URGENT 4, HIGH 3, MEDIUM 2, LOW 1.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }
}

/// A single notification as delivered by the upstream.
///
/// Only `is_read`/`read_at` ever change after creation, and only from unread
/// to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl NotificationRecord {
    /// Unread record with default priority and an empty payload.
    pub fn new(
        id: impl Into<String>,
        created_at: Timestamp,
        owner_user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            is_read: false,
            read_at: None,
            priority: Priority::default(),
            kind: String::new(),
            owner_user_id: Some(owner_user_id.into()),
            payload: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn read(mut self, at: Timestamp) -> Self {
        self.mark_read(at);
        self
    }

    /// Transition to read. Returns `false` if the record was already read.
    pub fn mark_read(&mut self, at: Timestamp) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }

    /// `true` when the upstream flagged this record for another audience.
    pub fn is_restricted_audience(&self) -> bool {
        matches!(self.payload.get(RESTRICTED_AUDIENCE_KEY), Some(Value::Bool(true)))
    }
}

// =============================================================================
// PEER ROLE & CONNECTION STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    Leader,
    #[default]
    Follower,
}

/// Leader-owned upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PollingFallback,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::PollingFallback => "polling_fallback",
        }
    }

    /// Gauge encoding used by the metrics exporter.
    pub fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::PollingFallback => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// LEADER RECORD
// =============================================================================

/// Single-slot, last-writer-wins leader announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderRecord {
    pub peer_id: PeerId,
    pub timestamp: Timestamp,
}

impl LeaderRecord {
    pub fn new(peer_id: PeerId, timestamp: Timestamp) -> Self {
        Self { peer_id, timestamp }
    }

    /// Abandoned once `now - timestamp > leader_timeout`.
    pub fn is_stale(&self, now: Timestamp, leader_timeout: Duration) -> bool {
        now.since(self.timestamp) > leader_timeout
    }

    pub fn is_held_by(&self, peer_id: &PeerId) -> bool {
        &self.peer_id == peer_id
    }
}

// =============================================================================
// REFRESH BATCH
// =============================================================================

/// Result of a full-refresh fetch: a page of records plus the server's
/// authoritative unread count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBatch {
    pub records: Vec<NotificationRecord>,
    pub unread_count: u64,
}
