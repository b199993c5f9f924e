//! Leader elector state machine.
//!
//! One elector runs in every peer. It reconciles against the leader record
//! in the shared store and against heartbeats on the peer bus:
//!
//! ```text
//!                 try_become_leader: slot free or stale, visible
//! [FOLLOWER] ───────────────────────────────────────────────────▶ [LEADER]
//!     ▲                                                               │
//!     ├──── heartbeat from another peer (unconditional) ──────────────┤
//!     ├──── leader check finds a fresh record naming another peer ────┤
//!     └──── hidden / shutdown (clear own record, TAB_INACTIVE) ───────┘
//! ```
//!
//! Every method takes `now` and returns [`ElectionAction`]s for the host to
//! perform; the elector itself never sleeps, publishes, or spawns.

use crate::config::ElectionConfig;
use crate::ports::{clear_leader_if_held, read_leader, write_leader, SharedRecordStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared_types::{
    LeaderRecord, MessageBody, PeerId, PeerMessage, Role, TimerCommand, TimerRegistry, TimerToken,
    Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElectionTimer {
    /// Leader only: rewrite the record and broadcast a heartbeat.
    Heartbeat,
    /// Periodic reconciliation against the leader record.
    LeaderCheck,
    /// Visibility settle delay before contending.
    Settle,
    /// Delayed contention after the leader went inactive.
    Takeover,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElectionAction {
    Publish(MessageBody),
    Timer(TimerCommand<ElectionTimer>),
    RoleChanged(Role),
}

pub struct LeaderElector {
    peer_id: PeerId,
    config: ElectionConfig,
    store: Arc<dyn SharedRecordStore>,
    role: Role,
    visible: bool,
    known_leader: Option<PeerId>,
    last_heartbeat_seen: Option<Timestamp>,
    timers: TimerRegistry<ElectionTimer>,
    rng: StdRng,
}

impl LeaderElector {
    /// `seed` drives takeover jitter, so a simulation can replay exactly.
    pub fn new(
        peer_id: PeerId,
        config: ElectionConfig,
        store: Arc<dyn SharedRecordStore>,
        seed: u64,
    ) -> Self {
        Self {
            peer_id,
            config,
            store,
            role: Role::Follower,
            visible: false,
            known_leader: None,
            last_heartbeat_seen: None,
            timers: TimerRegistry::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Last peer known to hold leadership (possibly self).
    pub fn known_leader(&self) -> Option<&PeerId> {
        self.known_leader.as_ref()
    }

    pub fn armed_timers(&self) -> Vec<ElectionTimer> {
        self.timers.armed_kinds()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Begin participating. A visible peer contends immediately and starts
    /// the periodic leader check.
    pub fn start(&mut self, now: Timestamp, visible: bool) -> Vec<ElectionAction> {
        self.visible = visible;
        if !visible {
            return Vec::new();
        }
        let mut actions =
            vec![self.arm(ElectionTimer::LeaderCheck, self.config.leader_check_interval())];
        actions.extend(self.try_become_leader(now));
        actions
    }

    /// Relinquish leadership and cancel every timer.
    pub fn shutdown(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        let mut actions = self.step_down(now);
        actions.extend(self.timers.cancel_all().into_iter().map(ElectionAction::Timer));
        self.visible = false;
        actions
    }

    pub fn set_visible(&mut self, visible: bool, now: Timestamp) -> Vec<ElectionAction> {
        if visible == self.visible {
            return Vec::new();
        }
        self.visible = visible;

        if visible {
            debug!(peer_id = %self.peer_id, "Visible, contending after settle delay");
            return vec![
                self.arm(ElectionTimer::Settle, self.config.settle_delay),
                self.arm(ElectionTimer::LeaderCheck, self.config.leader_check_interval()),
            ];
        }

        let mut actions = self.step_down(now);
        for kind in [
            ElectionTimer::Settle,
            ElectionTimer::Takeover,
            ElectionTimer::LeaderCheck,
        ] {
            actions.extend(self.cancel(kind));
        }
        actions
    }

    // =========================================================================
    // ELECTION
    // =========================================================================

    /// Claim leadership if the slot is free or abandoned and this peer is
    /// visible; otherwise settle as follower.
    pub fn try_become_leader(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        self.contend(now, false)
    }

    /// `blind_due` is set when a jittered blind-contention delay has run out.
    fn contend(&mut self, now: Timestamp, blind_due: bool) -> Vec<ElectionAction> {
        if !self.visible {
            return Vec::new();
        }

        match read_leader(self.store.as_ref()) {
            Ok(Some(record)) if record.is_held_by(&self.peer_id) => {
                if self.is_leader() {
                    Vec::new()
                } else {
                    info!(peer_id = %self.peer_id, "Leader record names self, resuming leadership");
                    self.become_leader(now)
                }
            }
            Ok(Some(record)) if !record.is_stale(now, self.config.leader_timeout) => {
                self.known_leader = Some(record.peer_id);
                self.demote("fresh leader record names another peer")
            }
            Ok(_) => self.claim(now),
            Err(error) if self.is_leader() => {
                warn!(
                    peer_id = %self.peer_id,
                    %error,
                    "Leader record unreadable, keeping leadership"
                );
                Vec::new()
            }
            Err(error) => {
                // Without the store, only a recent heartbeat proves a leader.
                let heard_recently = self
                    .last_heartbeat_seen
                    .is_some_and(|seen| now.since(seen) <= self.config.leader_timeout);
                warn!(peer_id = %self.peer_id, %error, heard_recently, "Leader record unreadable");
                if heard_recently {
                    self.demote("leader heartbeat seen recently")
                } else if blind_due {
                    self.claim(now)
                } else {
                    self.schedule_blind_claim()
                }
            }
        }
    }

    /// Handle a frame from another peer.
    pub fn on_peer_message(
        &mut self,
        message: &PeerMessage,
        now: Timestamp,
    ) -> Vec<ElectionAction> {
        match &message.body {
            MessageBody::LeaderHeartbeat { peer_id } if peer_id != &self.peer_id => {
                self.last_heartbeat_seen = Some(now);
                self.known_leader = Some(peer_id.clone());
                let mut actions: Vec<_> =
                    self.cancel(ElectionTimer::Takeover).into_iter().collect();
                actions.extend(self.demote("heartbeat from another leader"));
                actions
            }
            MessageBody::LeaderElection { peer_id } if peer_id != &self.peer_id => {
                if self.is_leader() && self.visible {
                    debug!(
                        peer_id = %self.peer_id,
                        challenger = %peer_id,
                        "Suppressing challenger"
                    );
                    vec![self.heartbeat_message()]
                } else {
                    Vec::new()
                }
            }
            MessageBody::TabInactive { peer_id } if peer_id != &self.peer_id => {
                let was_leader = self.known_leader.as_ref().map_or(true, |l| l == peer_id);
                if !was_leader {
                    return Vec::new();
                }
                self.known_leader = None;
                if self.visible && !self.is_leader() {
                    let delay = self.jittered_delay(self.config.takeover_jitter);
                    debug!(
                        peer_id = %self.peer_id,
                        delay_ms = delay.as_millis() as u64,
                        "Leader inactive, takeover scheduled"
                    );
                    vec![self.arm(ElectionTimer::Takeover, delay)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Handle a fired timer. Stale tokens are ignored.
    pub fn on_timer(
        &mut self,
        token: TimerToken<ElectionTimer>,
        now: Timestamp,
    ) -> Vec<ElectionAction> {
        if !self.timers.fire(token) {
            return Vec::new();
        }
        match token.kind {
            ElectionTimer::Heartbeat => self.heartbeat(now),
            ElectionTimer::LeaderCheck => {
                let mut actions =
                    vec![self.arm(ElectionTimer::LeaderCheck, self.config.leader_check_interval())];
                actions.extend(self.try_become_leader(now));
                actions
            }
            ElectionTimer::Settle => self.try_become_leader(now),
            ElectionTimer::Takeover => self.contend(now, true),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Spread a claim made without the store over one heartbeat interval, so
    /// the first claimant's heartbeat reaches the others before their own
    /// delay runs out.
    fn schedule_blind_claim(&mut self) -> Vec<ElectionAction> {
        if self.timers.is_armed(ElectionTimer::Takeover) {
            return Vec::new();
        }
        let delay = self.jittered_delay(self.config.heartbeat_interval);
        debug!(
            peer_id = %self.peer_id,
            delay_ms = delay.as_millis() as u64,
            "No leader heard, blind claim scheduled"
        );
        vec![self.arm(ElectionTimer::Takeover, delay)]
    }

    /// `takeover_delay` plus a random share of `spread`.
    fn jittered_delay(&mut self, spread: Duration) -> Duration {
        let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
        self.config.takeover_delay + Duration::from_millis(self.rng.gen_range(0..=spread_ms))
    }

    fn claim(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        if self.is_leader() {
            // Our own record expired or was removed under us: restore it.
            self.write_record(now);
            return Vec::new();
        }
        info!(peer_id = %self.peer_id, "Leader slot free or stale, claiming");
        let mut actions = vec![ElectionAction::Publish(MessageBody::LeaderElection {
            peer_id: self.peer_id.clone(),
        })];
        actions.extend(self.become_leader(now));
        actions
    }

    fn become_leader(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        self.write_record(now);
        self.role = Role::Leader;
        self.known_leader = Some(self.peer_id.clone());
        vec![
            ElectionAction::RoleChanged(Role::Leader),
            self.arm(ElectionTimer::Heartbeat, self.config.heartbeat_interval),
            self.heartbeat_message(),
        ]
    }

    fn heartbeat(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        if !self.is_leader() || !self.visible {
            return Vec::new();
        }
        self.write_record(now);
        vec![
            self.heartbeat_message(),
            self.arm(ElectionTimer::Heartbeat, self.config.heartbeat_interval),
        ]
    }

    fn demote(&mut self, reason: &'static str) -> Vec<ElectionAction> {
        if !self.is_leader() {
            return Vec::new();
        }
        info!(peer_id = %self.peer_id, reason, "Stepping down to follower");
        self.role = Role::Follower;
        let mut actions: Vec<_> = self.cancel(ElectionTimer::Heartbeat).into_iter().collect();
        actions.push(ElectionAction::RoleChanged(Role::Follower));
        actions
    }

    /// Leave leadership voluntarily: clear our record and tell the others.
    fn step_down(&mut self, now: Timestamp) -> Vec<ElectionAction> {
        if !self.is_leader() {
            return Vec::new();
        }
        if let Err(error) = clear_leader_if_held(self.store.as_ref(), &self.peer_id) {
            warn!(peer_id = %self.peer_id, %error, "Could not clear leader record");
        }
        debug!(peer_id = %self.peer_id, at = %now, "Relinquishing leadership");
        self.known_leader = None;
        let mut actions = self.demote("relinquished");
        actions.push(ElectionAction::Publish(MessageBody::TabInactive {
            peer_id: self.peer_id.clone(),
        }));
        actions
    }

    fn write_record(&self, now: Timestamp) {
        let record = LeaderRecord::new(self.peer_id.clone(), now);
        if let Err(error) = write_leader(self.store.as_ref(), &record) {
            warn!(
                peer_id = %self.peer_id,
                %error,
                "Leader record write failed, relying on heartbeats"
            );
        }
    }

    fn heartbeat_message(&self) -> ElectionAction {
        ElectionAction::Publish(MessageBody::LeaderHeartbeat {
            peer_id: self.peer_id.clone(),
        })
    }

    fn arm(&mut self, kind: ElectionTimer, delay: Duration) -> ElectionAction {
        ElectionAction::Timer(self.timers.arm(kind, delay))
    }

    fn cancel(&mut self, kind: ElectionTimer) -> Option<ElectionAction> {
        self.timers.cancel(kind).map(ElectionAction::Timer)
    }
}
