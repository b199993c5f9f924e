//! # Deterministic Simulation
//!
//! Discrete-event harness that runs several [`Peer`]s against a simulated
//! bus, a shared record store and a scripted upstream on a virtual clock.
//! Everything is ordered by `(time, sequence)`, so a run replays exactly.
//!
//! Bus frames go through the real encode/decode path and arrive after
//! `bus_latency`; upstream completions arrive after `upstream_latency`.
//! After every processed event the harness samples how many peers hold an
//! upstream channel, so tests can assert mutual exclusion at event
//! granularity.

use crate::config::PeerConfig;
use crate::events::{PeerCommand, PeerEffect, PeerEvent, PeerInput, PeerTimer};
use crate::service::Peer;
use hr_02_leader_election::{InMemoryRecordStore, SharedRecordStore};
use hr_03_connection::PushEvent;
use shared_types::{
    NotificationRecord, PeerId, PeerMessage, RefreshBatch, StorageError, TimerCommand, TimerToken,
    Timestamp, UpstreamError,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub peers: usize,
    pub peer: PeerConfig,
    pub user_id: String,
    pub start: Timestamp,
    pub bus_latency: Duration,
    pub upstream_latency: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            peer: PeerConfig::default(),
            user_id: "u1".to_string(),
            start: Timestamp(1_700_000_000_000),
            bus_latency: Duration::from_millis(2),
            upstream_latency: Duration::from_millis(20),
        }
    }
}

/// How the simulated upstream answers push-channel opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushBehavior {
    #[default]
    Accept,
    FailAlways,
    /// Never answer; the peer's connection timeout has to fire.
    Hang,
}

// =============================================================================
// SIMULATED COLLABORATORS
// =============================================================================

/// Shared record store whose reads can be blinded, so peers fail to see
/// each other's writes the way a lagging store would show them.
#[derive(Clone, Default)]
pub struct SimStore {
    inner: InMemoryRecordStore,
    blind: Arc<AtomicBool>,
}

impl SimStore {
    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }

    pub fn set_blind(&self, blind: bool) {
        self.blind.store(blind, Ordering::SeqCst);
    }
}

impl SharedRecordStore for SimStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.blind.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

/// Server side of the simulation.
#[derive(Debug, Default)]
pub struct SimUpstream {
    pub records: Vec<NotificationRecord>,
    pub push: PushBehavior,
    pub delivery_enabled: bool,
    pub push_opens: u64,
    pub polls: u64,
    pub fetches: u64,
}

impl SimUpstream {
    fn batch(&self, user_id: &str, limit: usize, offset: usize) -> RefreshBatch {
        let mut owned: Vec<NotificationRecord> = self
            .records
            .iter()
            .filter(|r| r.owner_user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        RefreshBatch {
            unread_count: owned.iter().filter(|r| !r.is_read).count() as u64,
            records: owned.into_iter().skip(offset).take(limit).collect(),
        }
    }

    fn newer_than(&self, user_id: &str, since: Timestamp) -> Vec<NotificationRecord> {
        self.records
            .iter()
            .filter(|r| r.owner_user_id.as_deref() == Some(user_id) && r.created_at > since)
            .cloned()
            .collect()
    }

    fn mark_read(&mut self, ids: &[String]) {
        for record in self.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.is_read = true;
        }
    }
}

// =============================================================================
// AGENDA
// =============================================================================

struct Scheduled {
    at: Timestamp,
    seq: u64,
    peer: usize,
    input: PeerInput,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct SimPeer {
    peer: Peer,
    alive: bool,
    /// Host-side view of armed timers, as a real scheduler would keep it.
    armed: BTreeMap<PeerTimer, TimerToken<PeerTimer>>,
    events: Vec<PeerEvent>,
}

// =============================================================================
// SIMULATION
// =============================================================================

pub struct Simulation {
    config: SimConfig,
    now: Timestamp,
    seq: u64,
    agenda: BinaryHeap<Reverse<Scheduled>>,
    peers: Vec<SimPeer>,
    store: SimStore,
    upstream: SimUpstream,
    /// `(peer, epoch)` handshakes the upstream has accepted but not delivered.
    pending_opens: BTreeSet<(usize, u64)>,
    /// `(peer, epoch)` channels the host holds open.
    channels: BTreeSet<(usize, u64)>,
    max_concurrent_channels: usize,
    frames_rejected: u64,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        let store = SimStore::default();
        let peers = (0..config.peers)
            .map(|i| SimPeer {
                peer: Peer::new(
                    PeerId::new(format!("peer-{i}")),
                    config.user_id.clone(),
                    config.peer.clone(),
                    Arc::new(store.clone()),
                    i as u64 + 1,
                ),
                alive: true,
                armed: BTreeMap::new(),
                events: Vec::new(),
            })
            .collect();
        Self {
            now: config.start,
            config,
            seq: 0,
            agenda: BinaryHeap::new(),
            peers,
            store,
            upstream: SimUpstream {
                delivery_enabled: true,
                ..SimUpstream::default()
            },
            pending_opens: BTreeSet::new(),
            channels: BTreeSet::new(),
            max_concurrent_channels: 0,
            frames_rejected: 0,
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn peer(&self, index: usize) -> &Peer {
        &self.peers[index].peer
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_alive(&self, index: usize) -> bool {
        self.peers[index].alive
    }

    /// Live peers that believe they lead.
    pub fn leaders(&self) -> Vec<usize> {
        self.live()
            .filter(|&i| self.peers[i].peer.is_leader())
            .collect()
    }

    /// Live peers holding an upstream channel.
    pub fn channel_holders(&self) -> Vec<usize> {
        self.live()
            .filter(|&i| self.peers[i].peer.has_open_channel())
            .collect()
    }

    /// Highest number of simultaneous channel holders seen so far.
    pub fn max_concurrent_channels(&self) -> usize {
        self.max_concurrent_channels
    }

    /// Push channels the upstream currently sees open.
    pub fn server_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn events(&self, index: usize) -> &[PeerEvent] {
        &self.peers[index].events
    }

    /// Ids a peer surfaced as new notifications, in order.
    pub fn surfaced(&self, index: usize) -> Vec<String> {
        self.peers[index]
            .events
            .iter()
            .filter_map(|event| match event {
                PeerEvent::NewNotification(record) => Some(record.id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn upstream(&self) -> &SimUpstream {
        &self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut SimUpstream {
        &mut self.upstream
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// An unread record owned by the simulated user, created now.
    pub fn new_record(&self, id: &str) -> NotificationRecord {
        NotificationRecord::new(id, self.now, self.config.user_id.clone())
    }

    // =========================================================================
    // CONTROLS
    // =========================================================================

    pub fn start(&mut self, index: usize, visible: bool) {
        self.deliver(index, PeerInput::Start { visible });
    }

    pub fn start_all(&mut self, visible: bool) {
        for index in 0..self.peers.len() {
            self.start(index, visible);
        }
    }

    pub fn set_visible(&mut self, index: usize, visible: bool) {
        self.deliver(index, PeerInput::VisibilityChanged(visible));
    }

    pub fn command(&mut self, index: usize, command: PeerCommand) {
        self.deliver(index, PeerInput::Command(command));
    }

    pub fn shutdown(&mut self, index: usize) {
        self.deliver(index, PeerInput::Shutdown);
    }

    /// Kill a peer without any cleanup. Its channels drop with it.
    pub fn crash(&mut self, index: usize) {
        self.peers[index].alive = false;
        self.pending_opens.retain(|(peer, _)| *peer != index);
        self.channels.retain(|(peer, _)| *peer != index);
    }

    /// Store `record` upstream and push it down every open channel.
    pub fn emit(&mut self, record: NotificationRecord) {
        self.upstream.records.push(record.clone());
        let channels: Vec<(usize, u64)> = self.channels.iter().copied().collect();
        for (peer, epoch) in channels {
            self.schedule(
                peer,
                self.config.upstream_latency,
                PeerInput::PushEvent {
                    epoch,
                    event: PushEvent::Record(record.clone()),
                },
            );
        }
    }

    /// Send a non-record event down every open channel.
    pub fn send_push_event(&mut self, event: PushEvent) {
        let channels: Vec<(usize, u64)> = self.channels.iter().copied().collect();
        for (peer, epoch) in channels {
            self.schedule(
                peer,
                self.config.upstream_latency,
                PeerInput::PushEvent {
                    epoch,
                    event: event.clone(),
                },
            );
        }
    }

    /// Break every open channel from the server side.
    pub fn drop_channels(&mut self) {
        let channels = std::mem::take(&mut self.channels);
        for (peer, epoch) in channels {
            self.schedule(
                peer,
                Duration::ZERO,
                PeerInput::PushFailed {
                    epoch,
                    error: UpstreamError::ChannelClosed,
                },
            );
        }
    }

    /// Inject a raw frame on the bus as if another peer had sent it.
    pub fn inject_frame(&mut self, frame: &[u8]) {
        for index in self.live().collect::<Vec<_>>() {
            match PeerMessage::decode(frame) {
                Ok(message) => {
                    self.schedule(index, self.config.bus_latency, PeerInput::Bus(message))
                }
                Err(error) => {
                    self.frames_rejected += 1;
                    warn!(%error, peer = index, "Rejected peer bus frame");
                }
            }
        }
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now.saturating_add(duration);
        self.run_until(deadline);
    }

    /// Process every event scheduled at or before `deadline`, then set the
    /// clock to `deadline`.
    pub fn run_until(&mut self, deadline: Timestamp) {
        while let Some(Reverse(next)) = self.agenda.peek() {
            if next.at > deadline {
                break;
            }
            let Some(Reverse(event)) = self.agenda.pop() else {
                break;
            };
            self.now = event.at;
            self.dispatch(event.peer, event.input);
        }
        self.now = self.now.max(deadline);
    }

    /// Step until `predicate` holds or `limit` elapses. Returns the time it
    /// first held.
    pub fn run_until_true(
        &mut self,
        limit: Duration,
        predicate: impl Fn(&Simulation) -> bool,
    ) -> Option<Timestamp> {
        let deadline = self.now.saturating_add(limit);
        loop {
            if predicate(self) {
                return Some(self.now);
            }
            let next_at = match self.agenda.peek() {
                Some(Reverse(next)) if next.at <= deadline => next.at,
                _ => {
                    self.now = self.now.max(deadline);
                    return predicate(self).then_some(self.now);
                }
            };
            self.run_until(next_at);
        }
    }

    fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.peers.len()).filter(|&i| self.peers[i].alive)
    }

    fn schedule(&mut self, peer: usize, delay: Duration, input: PeerInput) {
        self.seq += 1;
        self.agenda.push(Reverse(Scheduled {
            at: self.now.saturating_add(delay),
            seq: self.seq,
            peer,
            input,
        }));
    }

    /// Deliver an input immediately.
    fn deliver(&mut self, peer: usize, input: PeerInput) {
        self.dispatch(peer, input);
    }

    fn dispatch(&mut self, index: usize, input: PeerInput) {
        if !self.peers[index].alive {
            return;
        }
        match &input {
            PeerInput::TimerFired(token) => {
                if self.peers[index].armed.get(&token.kind) != Some(token) {
                    return;
                }
                self.peers[index].armed.remove(&token.kind);
            }
            PeerInput::PushOpened { epoch } => {
                if !self.pending_opens.remove(&(index, *epoch)) {
                    return;
                }
                self.channels.insert((index, *epoch));
            }
            PeerInput::PushEvent { epoch, .. } if !self.channels.contains(&(index, *epoch)) => {
                return;
            }
            _ => {}
        }
        trace!(peer = index, at = %self.now, input = input.label(), "Sim dispatch");
        let effects = self.peers[index].peer.handle(input, self.now);
        for effect in effects {
            self.perform(index, effect);
        }
        let holders = self.channel_holders().len();
        self.max_concurrent_channels = self.max_concurrent_channels.max(holders);
    }

    fn perform(&mut self, index: usize, effect: PeerEffect) {
        let latency = self.config.upstream_latency;
        let user_id = self.config.user_id.clone();
        match effect {
            PeerEffect::Timer(TimerCommand::Arm { token, delay }) => {
                self.peers[index].armed.insert(token.kind, token);
                self.schedule(index, delay, PeerInput::TimerFired(token));
            }
            PeerEffect::Timer(TimerCommand::Cancel { kind }) => {
                self.peers[index].armed.remove(&kind);
            }
            PeerEffect::Publish(message) => {
                let frame = match message.encode() {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(%error, "Frame not encodable");
                        return;
                    }
                };
                let receivers: Vec<usize> = self.live().filter(|&i| i != index).collect();
                for receiver in receivers {
                    match PeerMessage::decode(&frame) {
                        Ok(decoded) => {
                            self.schedule(
                                receiver,
                                self.config.bus_latency,
                                PeerInput::Bus(decoded),
                            )
                        }
                        Err(_) => self.frames_rejected += 1,
                    }
                }
            }
            PeerEffect::OpenPush { epoch } => {
                self.upstream.push_opens += 1;
                match self.upstream.push {
                    PushBehavior::Accept => {
                        self.pending_opens.insert((index, epoch));
                        self.schedule(index, latency, PeerInput::PushOpened { epoch });
                    }
                    PushBehavior::FailAlways => self.schedule(
                        index,
                        latency,
                        PeerInput::PushFailed {
                            epoch,
                            error: UpstreamError::Network("connection refused".to_string()),
                        },
                    ),
                    PushBehavior::Hang => {}
                }
            }
            PeerEffect::ClosePush { epoch } => {
                self.pending_opens.remove(&(index, epoch));
                self.channels.remove(&(index, epoch));
            }
            PeerEffect::Poll {
                epoch,
                since,
                requested_at,
            } => {
                self.upstream.polls += 1;
                let records = self.upstream.newer_than(&user_id, since);
                self.schedule(
                    index,
                    latency,
                    PeerInput::PollCompleted {
                        epoch,
                        requested_at,
                        result: Ok(records),
                    },
                );
            }
            PeerEffect::FetchRefresh { limit, offset } => {
                self.upstream.fetches += 1;
                let batch = self.upstream.batch(&user_id, limit, offset);
                self.schedule(index, latency, PeerInput::RefreshCompleted(Ok(batch)));
            }
            PeerEffect::MarkReadUpstream(ids) => {
                self.upstream.mark_read(&ids);
                self.schedule(index, latency, PeerInput::MarkReadCompleted(Ok(())));
            }
            PeerEffect::MarkAllReadUpstream => {
                for record in &mut self.upstream.records {
                    record.is_read = true;
                }
                self.schedule(index, latency, PeerInput::MarkReadCompleted(Ok(())));
            }
            PeerEffect::FetchPreferences => {
                let enabled = self.upstream.delivery_enabled;
                self.schedule(index, latency, PeerInput::PreferencesLoaded(Ok(enabled)));
            }
            PeerEffect::Notify(event) => self.peers[index].events.push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ConnectionState;

    fn sim(peers: usize) -> Simulation {
        Simulation::new(SimConfig {
            peers,
            ..SimConfig::default()
        })
    }

    #[test]
    fn test_first_visible_peer_leads_and_connects() {
        let mut sim = sim(3);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));

        assert_eq!(sim.leaders(), vec![0]);
        assert_eq!(sim.channel_holders(), vec![0]);
        assert_eq!(sim.peer(0).connection_state(), ConnectionState::Connected);
        assert_eq!(sim.server_channels(), 1);
    }

    #[test]
    fn test_emitted_record_reaches_every_peer() {
        let mut sim = sim(3);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));

        let record = sim.new_record("n1");
        sim.emit(record);
        sim.run_for(Duration::from_millis(200));
        for index in 0..3 {
            assert!(sim.peer(index).store().contains("n1"));
            assert_eq!(sim.peer(index).store().unread_count(), 1);
        }
        let surfaced: usize = (0..3).map(|i| sim.surfaced(i).len()).sum();
        assert_eq!(surfaced, 1);
    }

    #[test]
    fn test_crashed_leader_replaced_after_timeout() {
        let mut sim = sim(2);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));
        sim.crash(0);

        let timeout = sim.config().peer.election.leader_timeout;
        let check = sim.config().peer.election.leader_check_interval();
        let took_over = sim.run_until_true(timeout + check + Duration::from_secs(2), |s| {
            s.leaders() == vec![1] && s.peer(1).connection_state() == ConnectionState::Connected
        });
        assert!(took_over.is_some());
        assert_eq!(sim.max_concurrent_channels(), 1);
    }

    #[test]
    fn test_garbage_frame_rejected() {
        let mut sim = sim(2);
        sim.start_all(true);
        sim.inject_frame(br#"{"version":1,"fromPeerId":"x","sentAt":1,"body":{"type":"BOGUS"}}"#);
        assert_eq!(sim.frames_rejected(), 2);
    }

    #[test]
    fn test_identical_runs_replay_identically() {
        let run = || {
            let mut sim = sim(4);
            sim.upstream_mut().push = PushBehavior::FailAlways;
            sim.start_all(true);
            sim.run_for(Duration::from_secs(30));
            (sim.leaders(), sim.upstream().push_opens, sim.upstream().polls)
        };
        assert_eq!(run(), run());
    }
}
