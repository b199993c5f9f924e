//! # Peer Runtime
//!
//! Drives one [`Peer`] on tokio as an actor. A single unbounded mailbox
//! serializes every input; timers, the push stream, upstream calls and the
//! bus subscription run as tasks that only ever post back to the mailbox.
//!
//! ```text
//!  timers ─┐                                    ┌─▶ PeerBus::publish
//!  bus ────┤   mpsc   ┌────────────────────┐    ├─▶ spawn upstream call
//!  push ───┼────────▶ │ Peer::handle(input)│ ───┼─▶ arm / abort timer task
//!  calls ──┤          └────────────────────┘    ├─▶ watch<PeerSnapshot>
//!  handle ─┘                                    └─▶ broadcast<PeerEvent>
//! ```

use crate::error::{DeliveryError, DeliveryResult};
use crate::events::{PeerCommand, PeerEffect, PeerEvent, PeerInput, PeerSnapshot, PeerTimer};
use crate::ports::{DeliveryApi, UpstreamApi};
use crate::service::Peer;
use parking_lot::Mutex;
use shared_bus::{PeerBus, Subscription};
use shared_types::{PeerId, SystemTimeSource, TimeSource, TimerCommand, Timestamp, UpstreamError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Wall clock that advances with tokio's clock, so paused-time tests see
/// consistent timestamps.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSource {
    origin: Instant,
    origin_ms: u64,
}

impl TokioTimeSource {
    pub fn new() -> Self {
        Self::starting_at(SystemTimeSource.now())
    }

    pub fn starting_at(at: Timestamp) -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: at.as_millis(),
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now(&self) -> Timestamp {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.origin_ms.saturating_add(elapsed))
    }
}

/// Collaborators a running peer talks to.
pub struct RuntimeContext {
    pub bus: Arc<dyn PeerBus>,
    /// Must be filtered for this peer's id.
    pub subscription: Subscription,
    pub upstream: Arc<dyn UpstreamApi>,
    pub clock: Arc<dyn TimeSource>,
}

pub struct PeerRuntime;

impl PeerRuntime {
    /// Start `peer` on the current tokio runtime and return its handle.
    pub fn spawn(peer: Peer, context: RuntimeContext, visible: bool) -> PeerHandle {
        let peer_id = peer.peer_id().clone();
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(peer.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let bus_task = tokio::spawn(forward_bus(context.subscription, mailbox_tx.clone()));
        // The receiver is held below, so this cannot fail.
        let _ = mailbox_tx.send(PeerInput::Start { visible });

        let driver = Driver {
            user_id: peer.user_id().to_string(),
            peer,
            bus: context.bus,
            upstream: context.upstream,
            clock: context.clock,
            mailbox: mailbox_tx.clone(),
            timers: HashMap::new(),
            push_tasks: HashMap::new(),
            snapshot: snapshot_tx,
            events: events_tx.clone(),
        };
        let task = tokio::spawn(driver.run(mailbox_rx, bus_task));
        info!(peer_id = %peer_id, visible, "Peer runtime spawned");

        PeerHandle {
            peer_id,
            mailbox: mailbox_tx,
            snapshot: snapshot_rx,
            events: events_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

async fn forward_bus(mut subscription: Subscription, mailbox: mpsc::UnboundedSender<PeerInput>) {
    while let Some(message) = subscription.recv().await {
        if mailbox.send(PeerInput::Bus(message)).is_err() {
            break;
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    peer: Peer,
    user_id: String,
    bus: Arc<dyn PeerBus>,
    upstream: Arc<dyn UpstreamApi>,
    clock: Arc<dyn TimeSource>,
    mailbox: mpsc::UnboundedSender<PeerInput>,
    timers: HashMap<PeerTimer, JoinHandle<()>>,
    push_tasks: HashMap<u64, JoinHandle<()>>,
    snapshot: watch::Sender<PeerSnapshot>,
    events: broadcast::Sender<PeerEvent>,
}

impl Driver {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<PeerInput>,
        bus_task: JoinHandle<()>,
    ) {
        while let Some(input) = inbox.recv().await {
            let now = self.clock.now();
            let effects = self.peer.handle(input, now);
            for effect in effects {
                self.perform(effect);
            }
            self.snapshot.send_replace(self.peer.snapshot());
            if self.peer.is_stopped() {
                break;
            }
        }

        bus_task.abort();
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        for (_, task) in self.push_tasks.drain() {
            task.abort();
        }
        debug!(peer_id = %self.peer.peer_id(), "Peer runtime stopped");
    }

    fn perform(&mut self, effect: PeerEffect) {
        match effect {
            PeerEffect::Timer(TimerCommand::Arm { token, delay }) => {
                let mailbox = self.mailbox.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = mailbox.send(PeerInput::TimerFired(token));
                });
                if let Some(previous) = self.timers.insert(token.kind, task) {
                    previous.abort();
                }
            }
            PeerEffect::Timer(TimerCommand::Cancel { kind }) => {
                if let Some(task) = self.timers.remove(&kind) {
                    task.abort();
                }
            }
            PeerEffect::Publish(message) => {
                if let Err(error) = self.bus.publish(&message) {
                    warn!(
                        peer_id = %self.peer.peer_id(),
                        %error,
                        kind = %message.kind(),
                        "Publish failed"
                    );
                }
            }
            PeerEffect::OpenPush { epoch } => {
                let task = tokio::spawn(read_push_channel(
                    self.upstream.clone(),
                    self.user_id.clone(),
                    epoch,
                    self.mailbox.clone(),
                ));
                if let Some(previous) = self.push_tasks.insert(epoch, task) {
                    previous.abort();
                }
            }
            PeerEffect::ClosePush { epoch } => {
                if let Some(task) = self.push_tasks.remove(&epoch) {
                    task.abort();
                }
            }
            PeerEffect::Poll {
                epoch,
                since,
                requested_at,
            } => {
                let upstream = self.upstream.clone();
                let user_id = self.user_id.clone();
                self.call(async move {
                    let result = upstream.poll(&user_id, since).await;
                    PeerInput::PollCompleted {
                        epoch,
                        requested_at,
                        result,
                    }
                });
            }
            PeerEffect::FetchRefresh { limit, offset } => {
                let upstream = self.upstream.clone();
                let user_id = self.user_id.clone();
                self.call(async move {
                    PeerInput::RefreshCompleted(
                        upstream.fetch_notifications(&user_id, limit, offset).await,
                    )
                });
            }
            PeerEffect::MarkReadUpstream(ids) => {
                let upstream = self.upstream.clone();
                self.call(async move {
                    PeerInput::MarkReadCompleted(upstream.mark_read(&ids).await)
                });
            }
            PeerEffect::MarkAllReadUpstream => {
                let upstream = self.upstream.clone();
                let user_id = self.user_id.clone();
                self.call(async move {
                    PeerInput::MarkReadCompleted(upstream.mark_all_read(&user_id).await)
                });
            }
            PeerEffect::FetchPreferences => {
                let upstream = self.upstream.clone();
                let user_id = self.user_id.clone();
                self.call(async move {
                    PeerInput::PreferencesLoaded(upstream.delivery_enabled(&user_id).await)
                });
            }
            PeerEffect::Notify(event) => {
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }
    }

    /// Run an upstream call off the actor and post its completion back.
    fn call<F>(&self, call: F)
    where
        F: std::future::Future<Output = PeerInput> + Send + 'static,
    {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let _ = mailbox.send(call.await);
        });
    }
}

async fn read_push_channel(
    upstream: Arc<dyn UpstreamApi>,
    user_id: String,
    epoch: u64,
    mailbox: mpsc::UnboundedSender<PeerInput>,
) {
    let mut stream = match upstream.open_push_channel(&user_id).await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = mailbox.send(PeerInput::PushFailed { epoch, error });
            return;
        }
    };
    if mailbox.send(PeerInput::PushOpened { epoch }).is_err() {
        return;
    }
    while let Some(item) = stream.next().await {
        let input = match item {
            Ok(event) => PeerInput::PushEvent { epoch, event },
            Err(error) => {
                let _ = mailbox.send(PeerInput::PushFailed { epoch, error });
                return;
            }
        };
        if mailbox.send(input).is_err() {
            return;
        }
    }
    let _ = mailbox.send(PeerInput::PushFailed {
        epoch,
        error: UpstreamError::ChannelClosed,
    });
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable handle to a running peer.
#[derive(Clone)]
pub struct PeerHandle {
    peer_id: PeerId,
    mailbox: mpsc::UnboundedSender<PeerInput>,
    snapshot: watch::Receiver<PeerSnapshot>,
    events: broadcast::Sender<PeerEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PeerHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn is_running(&self) -> bool {
        !self.mailbox.is_closed()
    }

    pub fn set_visible(&self, visible: bool) -> DeliveryResult<()> {
        self.send(PeerInput::VisibilityChanged(visible))
    }

    pub fn retry_push(&self) -> DeliveryResult<()> {
        self.send(PeerInput::Command(PeerCommand::RetryPush))
    }

    pub fn check_preferences(&self) -> DeliveryResult<()> {
        self.send(PeerInput::Command(PeerCommand::CheckPreferences))
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_until(
        &self,
        predicate: impl Fn(&PeerSnapshot) -> bool,
    ) -> DeliveryResult<PeerSnapshot> {
        let mut snapshot = self.snapshot.clone();
        loop {
            {
                let current = snapshot.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            snapshot.changed().await.map_err(|_| DeliveryError::Stopped)?;
        }
    }

    /// Stop the peer: relinquish leadership, close channels, cancel timers.
    pub async fn shutdown(&self) -> DeliveryResult<()> {
        // Already stopped is not an error here.
        let _ = self.mailbox.send(PeerInput::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(peer_id = %self.peer_id, %error, "Peer task ended abnormally");
            }
        }
        Ok(())
    }

    fn send(&self, input: PeerInput) -> DeliveryResult<()> {
        self.mailbox.send(input).map_err(|_| DeliveryError::Stopped)
    }
}

impl DeliveryApi for PeerHandle {
    fn snapshot(&self) -> PeerSnapshot {
        self.snapshot.borrow().clone()
    }

    fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn request_mark_read(&self, ids: Vec<String>) -> DeliveryResult<()> {
        self.send(PeerInput::Command(PeerCommand::MarkRead(ids)))
    }

    fn request_mark_all_read(&self) -> DeliveryResult<()> {
        self.send(PeerInput::Command(PeerCommand::MarkAllRead))
    }

    fn request_refresh(&self) -> DeliveryResult<()> {
        self.send(PeerInput::Command(PeerCommand::Refresh))
    }
}
