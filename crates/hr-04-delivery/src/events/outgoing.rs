//! Outgoing effects and application-facing events
//!
//! The coordinator never performs I/O. Each call returns the
//! [`PeerEffect`]s its host must carry out, in order.

use serde::Serialize;
use shared_types::{
    ConnectionState, NotificationRecord, PeerId, PeerMessage, Role, TimerCommand, Timestamp,
};

use super::incoming::PeerTimer;

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEffect {
    Timer(TimerCommand<PeerTimer>),
    Publish(PeerMessage),

    OpenPush { epoch: u64 },
    ClosePush { epoch: u64 },
    Poll {
        epoch: u64,
        since: Timestamp,
        requested_at: Timestamp,
    },

    FetchRefresh { limit: usize, offset: usize },
    MarkReadUpstream(Vec<String>),
    MarkAllReadUpstream,
    FetchPreferences,

    Notify(PeerEvent),
}

/// Signals for the surrounding application.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A record should be surfaced to the user as new.
    NewNotification(NotificationRecord),
    RoleChanged(Role),
    ConnectionChanged(ConnectionState),
    /// Records or unread count changed.
    StoreChanged { unread_count: u64 },
}

/// Read-only view of one peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub records: Vec<NotificationRecord>,
    pub unread_count: u64,
    pub connection_state: ConnectionState,
    pub is_leader: bool,
    /// Leader: own push channel is up. Follower: last `CONNECTION_STATUS`.
    pub connected: bool,
    pub using_polling_fallback: bool,
    pub loading: bool,
    pub last_error: Option<String>,
    pub visible: bool,
}
