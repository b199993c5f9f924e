//! Incoming events for the peer coordinator
//!
//! Everything that can change a peer's state arrives as one [`PeerInput`]
//! on the peer's mailbox: timer fires, bus frames, upstream completions and
//! commands from the surrounding application.

use hr_02_leader_election::ElectionTimer;
use hr_03_connection::{ConnectionTimer, PushEvent};
use shared_types::{
    NotificationRecord, PeerMessage, RefreshBatch, TimerToken, Timestamp, UpstreamError,
};

/// Every timer a peer may have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerTimer {
    Election(ElectionTimer),
    Connection(ConnectionTimer),
    /// Debounced refresh after a new upstream record.
    Refresh,
    /// Leader's periodic reconciliation refresh.
    Reconcile,
}

/// Requests from the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    MarkRead(Vec<String>),
    MarkAllRead,
    Refresh,
    /// Leave polling fallback and try the push channel again.
    RetryPush,
    /// Ask upstream again whether delivery is enabled.
    CheckPreferences,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerInput {
    Start { visible: bool },
    VisibilityChanged(bool),
    TimerFired(TimerToken<PeerTimer>),
    Bus(PeerMessage),

    PushOpened { epoch: u64 },
    PushEvent { epoch: u64, event: PushEvent },
    PushFailed { epoch: u64, error: UpstreamError },
    PollCompleted {
        epoch: u64,
        requested_at: Timestamp,
        result: Result<Vec<NotificationRecord>, UpstreamError>,
    },

    RefreshCompleted(Result<RefreshBatch, UpstreamError>),
    PreferencesLoaded(Result<bool, UpstreamError>),
    MarkReadCompleted(Result<(), UpstreamError>),

    Command(PeerCommand),
    Shutdown,
}

impl PeerInput {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            PeerInput::Start { .. } => "start",
            PeerInput::VisibilityChanged(_) => "visibility",
            PeerInput::TimerFired(_) => "timer",
            PeerInput::Bus(_) => "bus",
            PeerInput::PushOpened { .. } => "push_opened",
            PeerInput::PushEvent { .. } => "push_event",
            PeerInput::PushFailed { .. } => "push_failed",
            PeerInput::PollCompleted { .. } => "poll_completed",
            PeerInput::RefreshCompleted(_) => "refresh_completed",
            PeerInput::PreferencesLoaded(_) => "preferences_loaded",
            PeerInput::MarkReadCompleted(_) => "mark_read_completed",
            PeerInput::Command(_) => "command",
            PeerInput::Shutdown => "shutdown",
        }
    }
}
