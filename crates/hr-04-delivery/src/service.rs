//! Delivery Coordinator - one peer's serialized core
//!
//! `Peer` owns the elector, the connection manager, the event store and the
//! persistence helpers. Every input goes through [`Peer::handle`], which
//! mutates state and returns the effects its host must perform. Nothing
//! here sleeps, spawns, or touches the network.

use crate::config::PeerConfig;
use crate::domain::{NoticeLedger, SnapshotCache};
use crate::events::{PeerCommand, PeerEffect, PeerEvent, PeerInput, PeerSnapshot, PeerTimer};
use crate::metrics;
use hr_01_event_store::{AudienceFilter, EventStore, IngestOutcome};
use hr_02_leader_election::{ElectionAction, LeaderElector, SharedRecordStore};
use hr_03_connection::{ConnectionAction, ConnectionManager};
use shared_types::{
    ConnectionState, MessageBody, NotificationRecord, PeerId, PeerMessage, RefreshBatch, Role,
    TimerRegistry, TimerToken, Timestamp, UpstreamError,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub struct Peer {
    peer_id: PeerId,
    config: PeerConfig,
    elector: LeaderElector,
    connection: ConnectionManager,
    store: EventStore,
    ledger: NoticeLedger,
    cache: SnapshotCache,
    timers: TimerRegistry<PeerTimer>,

    started: bool,
    stopped: bool,
    visible: bool,
    /// `None` until upstream answers the preferences query.
    delivery_enabled: Option<bool>,
    /// Only records created at or after this instant are surfaced as new.
    session_start: Timestamp,
    hidden_since: Option<Timestamp>,
    /// Follower's view of the leader's channel, from `CONNECTION_STATUS`.
    remote_connected: bool,
    refresh_in_flight: bool,
    refresh_pending: bool,
    /// A (re)connect is waiting on a refresh to surface what the gap missed.
    catch_up_pending: bool,
    last_error: Option<String>,
}

impl Peer {
    pub fn new(
        peer_id: PeerId,
        user_id: impl Into<String>,
        config: PeerConfig,
        shared: Arc<dyn SharedRecordStore>,
        seed: u64,
    ) -> Self {
        Self {
            elector: LeaderElector::new(
                peer_id.clone(),
                config.election.clone(),
                shared.clone(),
                seed,
            ),
            connection: ConnectionManager::new(config.connection.clone()),
            store: EventStore::new(config.store.clone(), AudienceFilter::new(user_id)),
            ledger: NoticeLedger::new(shared.clone(), config.notice_retention),
            cache: SnapshotCache::new(shared),
            timers: TimerRegistry::new(),
            peer_id,
            config,
            started: false,
            stopped: false,
            visible: false,
            delivery_enabled: None,
            session_start: Timestamp::ZERO,
            hidden_since: None,
            remote_connected: false,
            refresh_in_flight: false,
            refresh_pending: false,
            catch_up_pending: false,
            last_error: None,
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn user_id(&self) -> &str {
        self.store.audience().user_id()
    }

    pub fn role(&self) -> Role {
        self.elector.role()
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// `true` while this peer holds the upstream push or poll channel.
    pub fn has_open_channel(&self) -> bool {
        self.connection.has_open_channel()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn known_leader(&self) -> Option<&PeerId> {
        self.elector.known_leader()
    }

    pub fn armed_timers(&self) -> Vec<PeerTimer> {
        let mut armed: Vec<PeerTimer> = self
            .elector
            .armed_timers()
            .into_iter()
            .map(PeerTimer::Election)
            .chain(self.connection.armed_timers().into_iter().map(PeerTimer::Connection))
            .collect();
        armed.extend(self.timers.armed_kinds());
        armed.sort();
        armed
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let is_leader = self.elector.is_leader();
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            records: self.store.records().to_vec(),
            unread_count: self.store.unread_count(),
            connection_state: self.connection.state(),
            is_leader,
            connected: if is_leader {
                self.connection.is_connected()
            } else {
                self.remote_connected
            },
            using_polling_fallback: self.connection.is_polling(),
            loading: self.refresh_in_flight,
            last_error: self.last_error.clone(),
            visible: self.visible,
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Process one input. Effects are returned in the order they must be
    /// performed.
    pub fn handle(&mut self, input: PeerInput, now: Timestamp) -> Vec<PeerEffect> {
        if self.stopped {
            trace!(peer_id = %self.peer_id, input = input.label(), "Peer stopped, input dropped");
            return Vec::new();
        }
        let mut effects = Vec::new();
        match input {
            PeerInput::Start { visible } => self.start(visible, now, &mut effects),
            PeerInput::VisibilityChanged(visible) => self.set_visible(visible, now, &mut effects),
            PeerInput::TimerFired(token) => self.on_timer(token, now, &mut effects),
            PeerInput::Bus(message) => self.on_bus(message, now, &mut effects),
            PeerInput::PushOpened { epoch } => {
                let actions = self.connection.on_push_opened(epoch);
                self.apply_connection(actions, now, &mut effects);
            }
            PeerInput::PushEvent { epoch, event } => {
                let actions = self.connection.on_push_event(epoch, event, now);
                self.apply_connection(actions, now, &mut effects);
            }
            PeerInput::PushFailed { epoch, error } => {
                metrics::record_push_failure();
                let actions = self.connection.on_push_failed(epoch, &error, now);
                self.apply_connection(actions, now, &mut effects);
            }
            PeerInput::PollCompleted {
                epoch,
                requested_at,
                result,
            } => {
                if let Err(error) = &result {
                    self.last_error = Some(error.to_string());
                }
                let actions = self.connection.on_poll_result(epoch, requested_at, result);
                self.apply_connection(actions, now, &mut effects);
            }
            PeerInput::RefreshCompleted(result) => self.on_refresh(result, now, &mut effects),
            PeerInput::PreferencesLoaded(result) => self.on_preferences(result, now, &mut effects),
            PeerInput::MarkReadCompleted(result) => {
                if let Err(error) = result {
                    warn!(
                        peer_id = %self.peer_id,
                        %error,
                        "Upstream mark-read failed, local state kept"
                    );
                    self.last_error = Some(error.to_string());
                }
            }
            PeerInput::Command(command) => self.on_command(command, now, &mut effects),
            PeerInput::Shutdown => self.shutdown(now, &mut effects),
        }
        self.enforce_channel_exclusion(now, &mut effects);
        effects
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    fn start(&mut self, visible: bool, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        if self.started {
            return;
        }
        self.started = true;
        self.visible = visible;
        self.session_start = now;
        if !visible {
            self.hidden_since = Some(now);
        }
        info!(peer_id = %self.peer_id, visible, "Peer starting");

        if let Some(cached) = self.cache.load() {
            let seeded = self.store.seed(cached);
            if seeded > 0 {
                debug!(peer_id = %self.peer_id, seeded, "Store seeded from cache");
                self.notify_store(effects);
            }
        }
        effects.push(PeerEffect::FetchPreferences);
        let actions = self.elector.start(now, visible);
        self.apply_election(actions, now, effects);
    }

    fn set_visible(&mut self, visible: bool, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        if !self.started || visible == self.visible {
            return;
        }
        self.visible = visible;
        debug!(peer_id = %self.peer_id, visible, "Visibility changed");

        if visible {
            let since = self.hidden_since.take().unwrap_or(self.session_start);
            self.surface_unshown(since, now, effects);
            self.session_start = now;
        } else {
            self.hidden_since = Some(now);
        }
        let actions = self.elector.set_visible(visible, now);
        self.apply_election(actions, now, effects);
        self.sync_connection(now, effects);
    }

    fn shutdown(&mut self, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        info!(peer_id = %self.peer_id, "Peer shutting down");
        effects.extend(self.timers.cancel_all().into_iter().map(PeerEffect::Timer));
        let actions = self.connection.deactivate();
        self.apply_connection(actions, now, effects);
        let actions = self.elector.shutdown(now);
        self.apply_election(actions, now, effects);
        self.persist(now);
        self.visible = false;
        self.stopped = true;
    }

    // =========================================================================
    // INPUT HANDLERS
    // =========================================================================

    fn on_timer(
        &mut self,
        token: TimerToken<PeerTimer>,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        let generation = token.generation;
        match token.kind {
            PeerTimer::Election(kind) => {
                let actions = self.elector.on_timer(TimerToken { kind, generation }, now);
                self.apply_election(actions, now, effects);
            }
            PeerTimer::Connection(kind) => {
                let actions = self.connection.on_timer(TimerToken { kind, generation }, now);
                self.apply_connection(actions, now, effects);
            }
            PeerTimer::Refresh => {
                if self.timers.fire(token) {
                    self.start_refresh(effects);
                }
            }
            PeerTimer::Reconcile => {
                if self.timers.fire(token) && self.elector.is_leader() {
                    debug!(peer_id = %self.peer_id, "Reconciliation refresh");
                    self.start_refresh(effects);
                    effects.push(PeerEffect::Timer(
                        self.timers.arm(PeerTimer::Reconcile, self.config.reconcile_interval),
                    ));
                }
            }
        }
    }

    fn on_bus(&mut self, message: PeerMessage, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        if message.is_from(&self.peer_id) {
            trace!(peer_id = %self.peer_id, kind = %message.kind(), "Own frame dropped");
            return;
        }
        metrics::record_bus_received(message.kind());
        match message.body {
            MessageBody::LeaderHeartbeat { .. }
            | MessageBody::LeaderElection { .. }
            | MessageBody::TabInactive { .. } => {
                let actions = self.elector.on_peer_message(&message, now);
                self.apply_election(actions, now, effects);
            }
            MessageBody::ConnectionStatus { connected } => {
                if !self.elector.is_leader() {
                    self.remote_connected = connected;
                }
            }
            MessageBody::NewNotification { record } => {
                let id = record.id.clone();
                let outcome = self.store.ingest(record.clone());
                metrics::record_ingest(outcome);
                if outcome == IngestOutcome::Inserted {
                    let stored = self.store.get(&id).cloned().unwrap_or(record);
                    self.after_new_record(stored, now, effects);
                }
            }
            MessageBody::NotificationUpdate {
                records,
                unread_count,
            } => {
                self.store.apply_peer_update(records, unread_count);
                self.notify_store(effects);
            }
        }
    }

    fn on_command(&mut self, command: PeerCommand, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        match command {
            PeerCommand::MarkRead(ids) => {
                if ids.is_empty() {
                    return;
                }
                let changed = self.store.mark_read(&ids, now);
                effects.push(PeerEffect::MarkReadUpstream(ids));
                if changed > 0 {
                    self.broadcast_update(now, effects);
                }
            }
            PeerCommand::MarkAllRead => {
                self.store.mark_all_read(now);
                effects.push(PeerEffect::MarkAllReadUpstream);
                self.broadcast_update(now, effects);
            }
            PeerCommand::Refresh => self.start_refresh(effects),
            PeerCommand::RetryPush => {
                if self.elector.is_leader() {
                    let actions = self.connection.retry_push();
                    self.apply_connection(actions, now, effects);
                }
            }
            PeerCommand::CheckPreferences => effects.push(PeerEffect::FetchPreferences),
        }
    }

    fn on_preferences(
        &mut self,
        result: Result<bool, UpstreamError>,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        match result {
            Ok(enabled) => {
                info!(peer_id = %self.peer_id, enabled, "Delivery preferences loaded");
                self.delivery_enabled = Some(enabled);
                if enabled && !self.store.is_loaded() {
                    self.start_refresh(effects);
                }
            }
            Err(error) => {
                warn!(
                    peer_id = %self.peer_id,
                    %error,
                    "Preferences unavailable, delivery stays off"
                );
                self.last_error = Some(error.to_string());
            }
        }
        self.sync_connection(now, effects);
    }

    fn on_refresh(
        &mut self,
        result: Result<RefreshBatch, UpstreamError>,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        self.refresh_in_flight = false;
        match result {
            Ok(batch) => {
                self.store.merge(batch);
                self.last_error = None;
                self.broadcast_update(now, effects);
                if !self.refresh_pending && std::mem::take(&mut self.catch_up_pending) {
                    let since = now.saturating_sub(self.config.unshown_window);
                    self.surface_unshown(since, now, effects);
                }
            }
            Err(error) => {
                warn!(peer_id = %self.peer_id, %error, "Refresh failed, keeping local state");
                self.last_error = Some(error.to_string());
            }
        }
        if std::mem::take(&mut self.refresh_pending) {
            self.start_refresh(effects);
        }
    }

    // =========================================================================
    // COMPONENT ACTIONS
    // =========================================================================

    fn apply_election(
        &mut self,
        actions: Vec<ElectionAction>,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        for action in actions {
            match action {
                ElectionAction::Publish(body) => {
                    let heartbeat = matches!(body, MessageBody::LeaderHeartbeat { .. });
                    self.publish(body, now, effects);
                    if heartbeat {
                        // Restate channel state for peers that joined since the last transition.
                        let connected = self.connection.is_connected();
                        self.publish(MessageBody::ConnectionStatus { connected }, now, effects);
                    }
                }
                ElectionAction::Timer(command) => {
                    effects.push(PeerEffect::Timer(command.map(PeerTimer::Election)))
                }
                ElectionAction::RoleChanged(role) => {
                    effects.push(PeerEffect::Notify(PeerEvent::RoleChanged(role)));
                    self.on_role_changed(role, now, effects);
                }
            }
        }
    }

    fn on_role_changed(&mut self, role: Role, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        metrics::set_leader(role == Role::Leader);
        match role {
            Role::Leader => {
                metrics::record_election_won();
                self.remote_connected = false;
                effects.push(PeerEffect::Timer(
                    self.timers.arm(PeerTimer::Reconcile, self.config.reconcile_interval),
                ));
            }
            Role::Follower => {
                self.catch_up_pending = false;
                for kind in [PeerTimer::Refresh, PeerTimer::Reconcile] {
                    effects.extend(self.timers.cancel(kind).map(PeerEffect::Timer));
                }
            }
        }
        self.sync_connection(now, effects);
    }

    fn apply_connection(
        &mut self,
        actions: Vec<ConnectionAction>,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        for action in actions {
            match action {
                ConnectionAction::OpenPush { epoch } => {
                    effects.push(PeerEffect::OpenPush { epoch })
                }
                ConnectionAction::ClosePush { epoch } => {
                    effects.push(PeerEffect::ClosePush { epoch })
                }
                ConnectionAction::Poll {
                    epoch,
                    since,
                    requested_at,
                } => {
                    metrics::record_poll();
                    effects.push(PeerEffect::Poll {
                        epoch,
                        since,
                        requested_at,
                    });
                }
                ConnectionAction::Deliver(record) => self.ingest_upstream(record, now, effects),
                ConnectionAction::StatusChanged { connected } => {
                    self.publish(MessageBody::ConnectionStatus { connected }, now, effects)
                }
                ConnectionAction::StateChanged(state) => {
                    metrics::record_connection_state(state);
                    effects.push(PeerEffect::Notify(PeerEvent::ConnectionChanged(state)));
                }
                ConnectionAction::FlushUnshown => {
                    let since = now.saturating_sub(self.config.unshown_window);
                    self.surface_unshown(since, now, effects);
                    self.session_start = now;
                    // Records created while no channel was up only come back by fetch.
                    self.catch_up_pending = true;
                    self.start_refresh(effects);
                }
                ConnectionAction::Timer(command) => {
                    effects.push(PeerEffect::Timer(command.map(PeerTimer::Connection)))
                }
            }
        }
    }

    /// Bring the connection manager in line with role, visibility and
    /// preferences.
    fn sync_connection(&mut self, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        let should_run =
            self.elector.is_leader() && self.visible && self.delivery_enabled == Some(true);
        let actions = if should_run {
            self.connection.activate(now)
        } else {
            self.connection.deactivate()
        };
        self.apply_connection(actions, now, effects);
    }

    // =========================================================================
    // INGESTION & SURFACING
    // =========================================================================

    fn ingest_upstream(
        &mut self,
        record: NotificationRecord,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        let id = record.id.clone();
        let outcome = self.store.ingest(record.clone());
        metrics::record_ingest(outcome);
        if !outcome.is_new() {
            return;
        }
        let stored = self.store.get(&id).cloned().unwrap_or(record);
        if self.elector.is_leader() {
            self.publish(
                MessageBody::NewNotification {
                    record: stored.clone(),
                },
                now,
                effects,
            );
            effects.push(PeerEffect::Timer(
                self.timers.arm(PeerTimer::Refresh, self.config.refresh_debounce),
            ));
        }
        self.after_new_record(stored, now, effects);
    }

    /// Common tail of a genuinely new insert from any source.
    fn after_new_record(
        &mut self,
        record: NotificationRecord,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        self.notify_store(effects);
        self.surface(&record, now, effects);
        self.persist(now);
    }

    fn surface(
        &mut self,
        record: &NotificationRecord,
        now: Timestamp,
        effects: &mut Vec<PeerEffect>,
    ) {
        if record.is_read || !self.visible || record.created_at < self.session_start {
            return;
        }
        if self.ledger.record(&record.id, now) {
            debug!(peer_id = %self.peer_id, id = %record.id, "Surfacing new notification");
            effects.push(PeerEffect::Notify(PeerEvent::NewNotification(record.clone())));
        }
    }

    /// Surface unread records created at or after `since` that no peer has
    /// surfaced yet.
    fn surface_unshown(&mut self, since: Timestamp, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        if !self.visible {
            return;
        }
        self.ledger.sync(now);
        let pending: Vec<NotificationRecord> = self
            .store
            .records()
            .iter()
            .filter(|r| !r.is_read && r.created_at >= since && !self.ledger.contains(&r.id))
            .cloned()
            .collect();
        for record in pending.iter().rev() {
            if self.ledger.record(&record.id, now) {
                effects.push(PeerEffect::Notify(PeerEvent::NewNotification(record.clone())));
            }
        }
    }

    // =========================================================================
    // REFRESH & BROADCAST
    // =========================================================================

    fn start_refresh(&mut self, effects: &mut Vec<PeerEffect>) {
        if self.refresh_in_flight {
            self.refresh_pending = true;
            return;
        }
        self.refresh_in_flight = true;
        effects.push(PeerEffect::FetchRefresh {
            limit: self.config.store.max_records,
            offset: 0,
        });
    }

    /// Share the whole store with every peer and cache it.
    fn broadcast_update(&mut self, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        let snapshot = self.store.snapshot();
        self.publish(
            MessageBody::NotificationUpdate {
                records: snapshot.records,
                unread_count: snapshot.unread_count,
            },
            now,
            effects,
        );
        self.notify_store(effects);
        self.persist(now);
    }

    fn publish(&self, body: MessageBody, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        metrics::record_bus_sent(body.kind());
        effects.push(PeerEffect::Publish(PeerMessage::new(
            self.peer_id.clone(),
            now,
            body,
        )));
    }

    fn notify_store(&self, effects: &mut Vec<PeerEffect>) {
        effects.push(PeerEffect::Notify(PeerEvent::StoreChanged {
            unread_count: self.store.unread_count(),
        }));
    }

    fn persist(&mut self, now: Timestamp) {
        self.cache.save(&self.store.snapshot(), now);
    }

    /// Only the leader may hold an upstream channel. A violation is a bug;
    /// it is corrected by tearing the channel down.
    fn enforce_channel_exclusion(&mut self, now: Timestamp, effects: &mut Vec<PeerEffect>) {
        if self.connection.has_open_channel() && !self.elector.is_leader() {
            error!(
                peer_id = %self.peer_id,
                state = %self.connection.state(),
                "Channel open without leadership"
            );
            debug_assert!(self.elector.is_leader(), "upstream channel open on a follower");
            let actions = self.connection.deactivate();
            self.apply_connection(actions, now, effects);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_02_leader_election::{ElectionTimer, InMemoryRecordStore};
    use hr_03_connection::PushEvent;
    use shared_types::TimerCommand;

    const T0: Timestamp = Timestamp(1_000_000);

    fn peer(id: &str, store: &Arc<InMemoryRecordStore>) -> Peer {
        Peer::new(PeerId::from(id), "u1", PeerConfig::default(), store.clone(), 7)
    }

    fn shared() -> Arc<InMemoryRecordStore> {
        Arc::new(InMemoryRecordStore::new())
    }

    fn record(id: &str, at: Timestamp) -> NotificationRecord {
        NotificationRecord::new(id, at, "u1")
    }

    fn published(effects: &[PeerEffect]) -> Vec<MessageBody> {
        effects
            .iter()
            .filter_map(|e| match e {
                PeerEffect::Publish(m) => Some(m.body.clone()),
                _ => None,
            })
            .collect()
    }

    fn surfaced(effects: &[PeerEffect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                PeerEffect::Notify(PeerEvent::NewNotification(r)) => Some(r.id.clone()),
                _ => None,
            })
            .collect()
    }

    fn open_epoch(effects: &[PeerEffect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            PeerEffect::OpenPush { epoch } => Some(*epoch),
            _ => None,
        })
    }

    /// Start a visible leader with delivery enabled and a connected channel.
    fn connected_leader(store: &Arc<InMemoryRecordStore>) -> (Peer, u64) {
        let mut p = peer("peer-a", store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let effects = p.handle(PeerInput::PreferencesLoaded(Ok(true)), T0);
        let epoch = open_epoch(&effects).unwrap();
        p.handle(PeerInput::PushOpened { epoch }, T0);
        (p, epoch)
    }

    #[test]
    fn test_start_claims_but_waits_for_preferences() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        let effects = p.handle(PeerInput::Start { visible: true }, T0);

        assert!(p.is_leader());
        assert!(effects.contains(&PeerEffect::FetchPreferences));
        assert_eq!(open_epoch(&effects), None);
        assert_eq!(p.connection_state(), ConnectionState::Disconnected);

        let effects = p.handle(PeerInput::PreferencesLoaded(Ok(true)), T0);
        assert_eq!(open_epoch(&effects), Some(1));
        assert!(effects.contains(&PeerEffect::FetchRefresh { limit: 100, offset: 0 }));
    }

    #[test]
    fn test_disabled_preferences_keep_connection_down() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let effects = p.handle(PeerInput::PreferencesLoaded(Ok(false)), T0);
        assert_eq!(open_epoch(&effects), None);
        assert!(!effects.iter().any(|e| matches!(e, PeerEffect::FetchRefresh { .. })));
        assert!(!p.has_open_channel());
    }

    #[test]
    fn test_connected_leader_fans_out_new_record() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        let n1 = record("n1", T0.saturating_add(std::time::Duration::from_millis(5)));

        let effects = p.handle(
            PeerInput::PushEvent {
                epoch,
                event: PushEvent::Record(n1.clone()),
            },
            T0,
        );
        assert_eq!(published(&effects), vec![MessageBody::NewNotification { record: n1 }]);
        assert_eq!(surfaced(&effects), vec!["n1".to_string()]);
        assert!(p.armed_timers().contains(&PeerTimer::Refresh));
        assert_eq!(p.store().unread_count(), 1);

        let again = p.handle(
            PeerInput::PushEvent {
                epoch,
                event: PushEvent::Record(record("n1", T0)),
            },
            T0,
        );
        assert!(published(&again).is_empty());
        assert_eq!(p.store().unread_count(), 1);
    }

    #[test]
    fn test_connect_refetches_records_missed_without_channel() {
        let store = shared();
        let (mut p, _) = connected_leader(&store);
        let later = T0.saturating_add(std::time::Duration::from_secs(2));

        // The initial load was already in flight when the channel came up.
        let empty = RefreshBatch {
            records: Vec::new(),
            unread_count: 0,
        };
        let effects = p.handle(PeerInput::RefreshCompleted(Ok(empty)), later);
        assert!(effects.contains(&PeerEffect::FetchRefresh { limit: 100, offset: 0 }));
        assert!(surfaced(&effects).is_empty());

        let missed = record("gap", T0.saturating_add(std::time::Duration::from_secs(1)));
        let batch = RefreshBatch {
            records: vec![missed],
            unread_count: 1,
        };
        let effects = p.handle(PeerInput::RefreshCompleted(Ok(batch)), later);
        assert!(p.store().contains("gap"));
        assert_eq!(surfaced(&effects), vec!["gap".to_string()]);
        assert!(matches!(
            published(&effects).as_slice(),
            [MessageBody::NotificationUpdate { unread_count: 1, .. }]
        ));
    }

    #[test]
    fn test_follower_ingests_without_rebroadcast() {
        let store = shared();
        let (_leader, _) = connected_leader(&store);
        let mut follower = peer("peer-b", &store);
        follower.handle(PeerInput::Start { visible: true }, T0);
        assert!(!follower.is_leader());

        let frame = PeerMessage::new(
            PeerId::from("peer-a"),
            T0,
            MessageBody::NewNotification {
                record: record("n1", T0),
            },
        );
        let effects = follower.handle(PeerInput::Bus(frame), T0);
        assert!(published(&effects).is_empty());
        assert!(follower.store().contains("n1"));
        assert_eq!(follower.store().unread_count(), 1);
    }

    #[test]
    fn test_own_frames_are_dropped() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let echo = PeerMessage::new(
            PeerId::from("peer-a"),
            T0,
            MessageBody::NewNotification {
                record: record("n1", T0),
            },
        );
        assert!(p.handle(PeerInput::Bus(echo), T0).is_empty());
        assert!(p.store().is_empty());
    }

    #[test]
    fn test_hidden_leader_closes_channel_and_steps_down() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        let effects = p.handle(PeerInput::VisibilityChanged(false), T0);

        assert!(!p.is_leader());
        assert!(!p.has_open_channel());
        assert!(effects.contains(&PeerEffect::ClosePush { epoch }));
        let bodies = published(&effects);
        assert!(bodies.contains(&MessageBody::ConnectionStatus { connected: false }));
        assert!(bodies.contains(&MessageBody::TabInactive {
            peer_id: PeerId::from("peer-a")
        }));
    }

    #[test]
    fn test_foreign_heartbeat_demotes_and_closes() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        let heartbeat = PeerMessage::new(
            PeerId::from("peer-z"),
            T0,
            MessageBody::LeaderHeartbeat {
                peer_id: PeerId::from("peer-z"),
            },
        );
        let effects = p.handle(PeerInput::Bus(heartbeat), T0);
        assert!(!p.is_leader());
        assert!(effects.contains(&PeerEffect::ClosePush { epoch }));
        assert!(!p.armed_timers().contains(&PeerTimer::Reconcile));
    }

    #[test]
    fn test_late_push_open_after_step_down_is_closed() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let epoch = open_epoch(&p.handle(PeerInput::PreferencesLoaded(Ok(true)), T0)).unwrap();
        p.handle(PeerInput::VisibilityChanged(false), T0);

        let effects = p.handle(PeerInput::PushOpened { epoch }, T0);
        assert_eq!(effects, vec![PeerEffect::ClosePush { epoch }]);
        assert!(!p.has_open_channel());
    }

    #[test]
    fn test_mark_read_broadcasts_update() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        p.handle(
            PeerInput::PushEvent {
                epoch,
                event: PushEvent::Record(record("n1", T0)),
            },
            T0,
        );
        let effects = p.handle(PeerInput::Command(PeerCommand::MarkRead(vec!["n1".into()])), T0);

        assert!(effects.contains(&PeerEffect::MarkReadUpstream(vec!["n1".into()])));
        match published(&effects).as_slice() {
            [MessageBody::NotificationUpdate {
                records,
                unread_count,
            }] => {
                assert_eq!(*unread_count, 0);
                assert!(records[0].is_read);
            }
            other => panic!("unexpected publish {other:?}"),
        }
    }

    #[test]
    fn test_refresh_requests_coalesce() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let first = p.handle(PeerInput::Command(PeerCommand::Refresh), T0);
        let second = p.handle(PeerInput::Command(PeerCommand::Refresh), T0);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(p.snapshot().loading);

        let batch = RefreshBatch {
            records: vec![record("n1", T0)],
            unread_count: 1,
        };
        let effects = p.handle(PeerInput::RefreshCompleted(Ok(batch)), T0);
        assert!(effects.contains(&PeerEffect::FetchRefresh { limit: 100, offset: 0 }));
        assert!(matches!(
            published(&effects).as_slice(),
            [MessageBody::NotificationUpdate { unread_count: 1, .. }]
        ));
    }

    #[test]
    fn test_failed_refresh_keeps_state_and_reports() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        p.handle(PeerInput::Command(PeerCommand::Refresh), T0);
        let effects = p.handle(PeerInput::RefreshCompleted(Err(UpstreamError::Timeout)), T0);
        assert!(published(&effects).is_empty());
        assert_eq!(p.snapshot().last_error.as_deref(), Some("Upstream request timed out"));
        assert!(!p.snapshot().loading);
    }

    #[test]
    fn test_notice_surfaced_by_only_one_peer() {
        let store = shared();
        let mut a = peer("peer-a", &store);
        let mut b = peer("peer-b", &store);
        a.handle(PeerInput::Start { visible: true }, T0);
        b.handle(PeerInput::Start { visible: true }, T0);

        let frame = |from: &str| {
            PeerMessage::new(
                PeerId::from(from),
                T0,
                MessageBody::NewNotification {
                    record: record("n1", T0),
                },
            )
        };
        let from_a = b.handle(PeerInput::Bus(frame("peer-x")), T0);
        let from_b = a.handle(PeerInput::Bus(frame("peer-x")), T0);
        assert_eq!(surfaced(&from_a).len() + surfaced(&from_b).len(), 1);
    }

    #[test]
    fn test_records_from_hidden_period_surface_on_return() {
        let store = shared();
        let mut p = peer("peer-b", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let later = T0.saturating_add(std::time::Duration::from_secs(10));
        p.handle(PeerInput::VisibilityChanged(false), T0);

        let frame = PeerMessage::new(
            PeerId::from("peer-x"),
            later,
            MessageBody::NewNotification {
                record: record("n1", later),
            },
        );
        assert!(surfaced(&p.handle(PeerInput::Bus(frame), later)).is_empty());

        let effects = p.handle(PeerInput::VisibilityChanged(true), later);
        assert_eq!(surfaced(&effects), vec!["n1".to_string()]);
    }

    #[test]
    fn test_follower_tracks_remote_connection_status() {
        let store = shared();
        let (_leader, _) = connected_leader(&store);
        let mut follower = peer("peer-b", &store);
        follower.handle(PeerInput::Start { visible: true }, T0);
        let status = PeerMessage::new(
            PeerId::from("peer-a"),
            T0,
            MessageBody::ConnectionStatus { connected: true },
        );
        follower.handle(PeerInput::Bus(status), T0);
        let snapshot = follower.snapshot();
        assert!(snapshot.connected);
        assert!(!snapshot.is_leader);
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_election_timer_ignored() {
        let store = shared();
        let mut p = peer("peer-a", &store);
        p.handle(PeerInput::Start { visible: true }, T0);
        let stale = TimerToken {
            kind: PeerTimer::Election(ElectionTimer::Heartbeat),
            generation: 0,
        };
        assert!(p.handle(PeerInput::TimerFired(stale), T0).is_empty());
    }

    #[test]
    fn test_shutdown_cancels_everything_and_goes_quiet() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        let effects = p.handle(PeerInput::Shutdown, T0);

        assert!(p.is_stopped());
        assert!(p.armed_timers().is_empty());
        assert!(effects.contains(&PeerEffect::ClosePush { epoch }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, PeerEffect::Timer(TimerCommand::Cancel { .. }))));
        assert!(p.handle(PeerInput::Command(PeerCommand::Refresh), T0).is_empty());
    }

    #[test]
    fn test_retry_push_leaves_polling() {
        let store = shared();
        let (mut p, epoch) = connected_leader(&store);
        p.handle(
            PeerInput::PushEvent {
                epoch,
                event: PushEvent::TimeoutWarning {
                    should_reconnect: false,
                },
            },
            T0,
        );
        assert_eq!(p.connection_state(), ConnectionState::PollingFallback);
        assert!(p.snapshot().using_polling_fallback);

        let effects = p.handle(PeerInput::Command(PeerCommand::RetryPush), T0);
        assert!(open_epoch(&effects).is_some());
        assert_eq!(p.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_cached_snapshot_seeds_new_peer() {
        let store = shared();
        let (mut leader, epoch) = connected_leader(&store);
        leader.handle(
            PeerInput::PushEvent {
                epoch,
                event: PushEvent::Record(record("n1", T0)),
            },
            T0,
        );
        let mut late = peer("peer-c", &store);
        late.handle(PeerInput::Start { visible: false }, T0);
        assert!(late.store().contains("n1"));
        assert!(!late.store().is_loaded());
    }
}
