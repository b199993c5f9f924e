//! Connection manager state machine (leader only).
//!
//! ```text
//!                 activate
//! [DISCONNECTED] ─────────▶ [CONNECTING] ──handshake──▶ [CONNECTED]
//!       ▲                    │    ▲                         │
//!       │                    │    │ reconnect timer         │ error / liveness
//!       │            error / │    │                         │
//!       │            timeout ▼    │                         ▼
//!       │                  [RECONNECTING] ◀─────────────────┘
//!       │                         │ failures >= max_push_failures
//!       │                         │ or attempts >= max_reconnect_attempts
//!       │                         ▼
//!       └── deactivate ── [POLLING_FALLBACK] ──retry_push──▶ [CONNECTING]
//! ```
//!
//! The manager owns no I/O. It emits [`ConnectionAction`]s and accepts
//! completions tagged with the `epoch` they were issued under; completions
//! from an older epoch are ignored, and a stale push channel that opens late
//! is closed again.

use super::backoff::Backoff;
use super::push::PushEvent;
use crate::config::ConnectionConfig;
use shared_types::{
    ConnectionState, NotificationRecord, TimerCommand, TimerRegistry, TimerToken, Timestamp,
    UpstreamError,
};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionTimer {
    /// Handshake deadline, armed on entering `Connecting`.
    ConnectTimeout,
    /// Silence deadline while `Connected`.
    Liveness,
    /// Backoff before the next push attempt.
    Reconnect,
    /// Polling period in `PollingFallback`.
    Poll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open the push channel; report back with this epoch.
    OpenPush { epoch: u64 },
    /// Close the push channel opened under `epoch`.
    ClosePush { epoch: u64 },
    /// Query the polling endpoint for records newer than `since`.
    Poll {
        epoch: u64,
        since: Timestamp,
        requested_at: Timestamp,
    },
    /// Feed a record into the ingestion path.
    Deliver(NotificationRecord),
    /// Broadcast `CONNECTION_STATUS`.
    StatusChanged { connected: bool },
    StateChanged(ConnectionState),
    /// The push channel came up: surface buffered-but-unshown records.
    FlushUnshown,
    Timer(TimerCommand<ConnectionTimer>),
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    backoff: Backoff,
    state: ConnectionState,
    epoch: u64,
    push_open: bool,
    failure_count: u32,
    retry_attempt: u32,
    poll_in_flight: bool,
    /// Records newer than this have not been confirmed received.
    delivery_cursor: Timestamp,
    reconnect_delays: Vec<Duration>,
    timers: TimerRegistry<ConnectionTimer>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            backoff: Backoff::new(config.base_reconnect_delay, config.reconnect_delay_cap),
            config,
            state: ConnectionState::Disconnected,
            epoch: 0,
            push_open: false,
            failure_count: 0,
            retry_attempt: 0,
            poll_in_flight: false,
            delivery_cursor: Timestamp::ZERO,
            reconnect_delays: Vec::new(),
            timers: TimerRegistry::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_polling(&self) -> bool {
        self.state == ConnectionState::PollingFallback
    }

    /// `true` while this manager holds an upstream channel (push or poll).
    pub fn has_open_channel(&self) -> bool {
        self.push_open || self.is_polling()
    }

    /// Every backoff delay scheduled since the last activation, in order.
    pub fn reconnect_delays(&self) -> &[Duration] {
        &self.reconnect_delays
    }

    pub fn armed_timers(&self) -> Vec<ConnectionTimer> {
        self.timers.armed_kinds()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Leadership acquired (with all preconditions met): start pushing.
    pub fn activate(&mut self, now: Timestamp) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        info!(epoch = self.epoch + 1, "Activating upstream connection");
        self.failure_count = 0;
        self.retry_attempt = 0;
        self.reconnect_delays.clear();
        self.delivery_cursor = now;
        self.open_push()
    }

    /// Leadership or visibility lost, or shutdown: tear everything down.
    pub fn deactivate(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        info!(from = %self.state, "Deactivating upstream connection");
        let mut actions: Vec<_> = self
            .timers
            .cancel_all()
            .into_iter()
            .map(ConnectionAction::Timer)
            .collect();
        actions.extend(self.close_push());
        self.poll_in_flight = false;
        self.epoch += 1;
        actions.extend(self.transition(ConnectionState::Disconnected));
        actions.push(ConnectionAction::StatusChanged { connected: false });
        actions
    }

    /// Explicit request to leave polling and try the push channel again.
    pub fn retry_push(&mut self) -> Vec<ConnectionAction> {
        if !self.is_polling() {
            return Vec::new();
        }
        info!("Retrying push channel from polling fallback");
        let mut actions: Vec<_> = self.cancel(ConnectionTimer::Poll).into_iter().collect();
        self.poll_in_flight = false;
        self.failure_count = 0;
        self.retry_attempt = 0;
        actions.extend(self.open_push());
        actions
    }

    // =========================================================================
    // PUSH CHANNEL COMPLETIONS
    // =========================================================================

    pub fn on_push_opened(&mut self, epoch: u64) -> Vec<ConnectionAction> {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "Late push channel closed");
            return vec![ConnectionAction::ClosePush { epoch }];
        }
        info!(epoch, "Push channel connected");
        self.failure_count = 0;
        self.retry_attempt = 0;
        let mut actions: Vec<_> = self
            .cancel(ConnectionTimer::ConnectTimeout)
            .into_iter()
            .collect();
        actions.push(self.arm(ConnectionTimer::Liveness, self.config.liveness_timeout));
        actions.extend(self.transition(ConnectionState::Connected));
        actions.push(ConnectionAction::StatusChanged { connected: true });
        actions.push(ConnectionAction::FlushUnshown);
        actions
    }

    pub fn on_push_event(
        &mut self,
        epoch: u64,
        event: PushEvent,
        now: Timestamp,
    ) -> Vec<ConnectionAction> {
        if epoch != self.epoch || self.state != ConnectionState::Connected {
            return Vec::new();
        }
        if event == (PushEvent::TimeoutWarning { should_reconnect: false }) {
            info!(epoch, "Server requested polling");
            return self.enter_polling(now);
        }
        let mut actions = vec![self.arm(ConnectionTimer::Liveness, self.config.liveness_timeout)];
        match event {
            PushEvent::Record(record) => {
                self.delivery_cursor = self.delivery_cursor.max(now);
                actions.push(ConnectionAction::Deliver(record));
            }
            PushEvent::Keepalive => {
                self.delivery_cursor = self.delivery_cursor.max(now);
            }
            PushEvent::Connected => debug!(epoch, "Push channel hello"),
            PushEvent::TimeoutWarning { .. } => {
                debug!(epoch, "Server will close the push channel, awaiting reconnect")
            }
            PushEvent::Error(reason) => warn!(epoch, %reason, "Push channel reported an error"),
        }
        actions
    }

    pub fn on_push_failed(
        &mut self,
        epoch: u64,
        error: &UpstreamError,
        now: Timestamp,
    ) -> Vec<ConnectionAction> {
        if epoch != self.epoch
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return Vec::new();
        }
        warn!(epoch, %error, failures = self.failure_count + 1, "Push channel failed");
        self.push_failure(now)
    }

    // =========================================================================
    // POLLING COMPLETIONS
    // =========================================================================

    pub fn on_poll_result(
        &mut self,
        epoch: u64,
        requested_at: Timestamp,
        result: Result<Vec<NotificationRecord>, UpstreamError>,
    ) -> Vec<ConnectionAction> {
        if epoch != self.epoch || !self.is_polling() {
            return Vec::new();
        }
        self.poll_in_flight = false;
        match result {
            Ok(records) => {
                self.delivery_cursor = self.delivery_cursor.max(requested_at);
                debug!(count = records.len(), "Poll returned");
                records.into_iter().map(ConnectionAction::Deliver).collect()
            }
            Err(error) => {
                warn!(%error, "Poll failed, cursor unchanged");
                Vec::new()
            }
        }
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    pub fn on_timer(
        &mut self,
        token: TimerToken<ConnectionTimer>,
        now: Timestamp,
    ) -> Vec<ConnectionAction> {
        if !self.timers.fire(token) {
            return Vec::new();
        }
        match token.kind {
            ConnectionTimer::ConnectTimeout if self.state == ConnectionState::Connecting => {
                warn!(epoch = self.epoch, "Push channel handshake timed out");
                self.push_failure(now)
            }
            ConnectionTimer::Liveness if self.state == ConnectionState::Connected => {
                warn!(epoch = self.epoch, "Push channel silent, presumed dead");
                self.push_failure(now)
            }
            ConnectionTimer::Reconnect if self.state == ConnectionState::Reconnecting => {
                self.open_push()
            }
            ConnectionTimer::Poll if self.is_polling() => {
                let mut actions =
                    vec![self.arm(ConnectionTimer::Poll, self.config.polling_interval)];
                actions.extend(self.issue_poll(now));
                actions
            }
            _ => Vec::new(),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn open_push(&mut self) -> Vec<ConnectionAction> {
        self.epoch += 1;
        self.push_open = true;
        let mut actions: Vec<_> = self
            .transition(ConnectionState::Connecting)
            .into_iter()
            .collect();
        actions.push(self.arm(ConnectionTimer::ConnectTimeout, self.config.connection_timeout));
        actions.push(ConnectionAction::OpenPush { epoch: self.epoch });
        actions
    }

    fn close_push(&mut self) -> Option<ConnectionAction> {
        if !self.push_open {
            return None;
        }
        self.push_open = false;
        Some(ConnectionAction::ClosePush { epoch: self.epoch })
    }

    fn push_failure(&mut self, now: Timestamp) -> Vec<ConnectionAction> {
        let was_connected = self.is_connected();
        let mut actions: Vec<_> = [ConnectionTimer::ConnectTimeout, ConnectionTimer::Liveness]
            .into_iter()
            .filter_map(|kind| self.cancel(kind))
            .collect();
        actions.extend(self.close_push());
        if was_connected {
            actions.push(ConnectionAction::StatusChanged { connected: false });
        }

        self.failure_count += 1;
        if self.failure_count >= self.config.max_push_failures
            || self.retry_attempt >= self.config.max_reconnect_attempts
        {
            info!(
                failures = self.failure_count,
                attempts = self.retry_attempt,
                "Push channel unreliable, falling back to polling"
            );
            actions.extend(self.enter_polling(now));
            return actions;
        }

        let delay = self.backoff.delay(self.retry_attempt);
        self.retry_attempt += 1;
        self.reconnect_delays.push(delay);
        debug!(
            attempt = self.retry_attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        actions.extend(self.transition(ConnectionState::Reconnecting));
        actions.push(self.arm(ConnectionTimer::Reconnect, delay));
        actions
    }

    fn enter_polling(&mut self, now: Timestamp) -> Vec<ConnectionAction> {
        let was_connected = self.is_connected();
        let mut actions: Vec<_> = [
            ConnectionTimer::ConnectTimeout,
            ConnectionTimer::Liveness,
            ConnectionTimer::Reconnect,
        ]
        .into_iter()
        .filter_map(|kind| self.cancel(kind))
        .collect();
        actions.extend(self.close_push());
        if was_connected {
            actions.push(ConnectionAction::StatusChanged { connected: false });
        }
        actions.extend(self.transition(ConnectionState::PollingFallback));
        actions.push(self.arm(ConnectionTimer::Poll, self.config.polling_interval));
        actions.extend(self.issue_poll(now));
        actions
    }

    fn issue_poll(&mut self, now: Timestamp) -> Option<ConnectionAction> {
        if self.poll_in_flight {
            debug!("Previous poll still in flight, skipping");
            return None;
        }
        self.poll_in_flight = true;
        Some(ConnectionAction::Poll {
            epoch: self.epoch,
            since: self.delivery_cursor,
            requested_at: now,
        })
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionAction> {
        if self.state == next {
            return None;
        }
        debug!(from = %self.state, to = %next, "Connection state transition");
        self.state = next;
        Some(ConnectionAction::StateChanged(next))
    }

    fn arm(&mut self, kind: ConnectionTimer, delay: Duration) -> ConnectionAction {
        ConnectionAction::Timer(self.timers.arm(kind, delay))
    }

    fn cancel(&mut self, kind: ConnectionTimer) -> Option<ConnectionAction> {
        self.timers.cancel(kind).map(ConnectionAction::Timer)
    }
}
