//! # Herald Host
//!
//! Wires N peers of one origin to an in-process bus, a shared record store
//! and a scripted upstream, then runs three background loops:
//!
//! ```text
//!   emitter  ── every demo_interval ──▶ upstream.emit(record)
//!   rotation ── every visibility_rotation ──▶ hide current, show next
//!   stats    ── every stats_interval ──▶ per-peer status lines + gauges
//! ```

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use herald_telemetry::log_peer_event;
use hr_02_leader_election::{FileRecordStore, InMemoryRecordStore, SharedRecordStore};
use hr_04_delivery::adapters::ScriptedUpstream;
use hr_04_delivery::{
    metrics, DeliveryApi, Peer, PeerHandle, PeerRuntime, RuntimeContext, TokioTimeSource,
};
use rand::Rng;
use shared_bus::{InMemoryPeerBus, MessageFilter};
use shared_types::{NotificationRecord, PeerId, Priority, TimeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PRIORITIES: [Priority; 4] = [
    Priority::Low,
    Priority::Medium,
    Priority::High,
    Priority::Urgent,
];

pub struct HeraldHost {
    config: RuntimeConfig,
    bus: Arc<InMemoryPeerBus>,
    upstream: ScriptedUpstream,
    peers: Vec<PeerHandle>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl HeraldHost {
    /// Spawn every peer and the background loops. Only the first peer
    /// starts visible.
    pub fn start(config: RuntimeConfig) -> Result<Self> {
        let peer_config = config.peer_config()?;
        let store: Arc<dyn SharedRecordStore> = match &config.store_dir {
            Some(dir) => Arc::new(
                FileRecordStore::open(dir)
                    .with_context(|| format!("opening shared store at {}", dir.display()))?,
            ),
            None => Arc::new(InMemoryRecordStore::new()),
        };
        let bus = Arc::new(InMemoryPeerBus::new());
        let upstream = ScriptedUpstream::new();
        let clock = Arc::new(TokioTimeSource::new());

        info!(
            peers = config.peers,
            user_id = %config.user_id,
            profile = %config.profile,
            persistent = config.store_dir.is_some(),
            "Starting Herald host"
        );

        let mut rng = rand::thread_rng();
        let peers: Vec<PeerHandle> = (0..config.peers)
            .map(|index| {
                let peer_id = PeerId::random();
                let peer = Peer::new(
                    peer_id.clone(),
                    config.user_id.clone(),
                    peer_config.clone(),
                    store.clone(),
                    rng.gen(),
                );
                let context = RuntimeContext {
                    bus: bus.clone(),
                    subscription: bus.subscribe(MessageFilter::for_peer(peer_id)),
                    upstream: Arc::new(upstream.clone()),
                    clock: clock.clone(),
                };
                PeerRuntime::spawn(peer, context, index == 0)
            })
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(emit_loop(
                upstream.clone(),
                clock.clone(),
                config.user_id.clone(),
                config.demo_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(rotate_loop(
                peers.clone(),
                config.visibility_rotation,
                shutdown_rx.clone(),
            )),
            tokio::spawn(stats_loop(
                peers.clone(),
                bus.clone(),
                config.stats_interval,
                shutdown_rx,
            )),
        ];

        Ok(Self {
            config,
            bus,
            upstream,
            peers,
            shutdown_tx,
            tasks,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn peers(&self) -> &[PeerHandle] {
        &self.peers
    }

    pub fn upstream(&self) -> &ScriptedUpstream {
        &self.upstream
    }

    pub fn bus(&self) -> &InMemoryPeerBus {
        &self.bus
    }

    /// Stop the loops, then every peer. Leaders step down on the way out.
    pub async fn shutdown(self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        if self.shutdown_tx.send(true).is_err() {
            debug!("Background loops already stopped");
        }
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "Background loop ended abnormally");
            }
        }
        for peer in &self.peers {
            peer.shutdown().await?;
        }
        info!("Shutdown complete");
        Ok(())
    }
}

async fn emit_loop(
    upstream: ScriptedUpstream,
    clock: Arc<TokioTimeSource>,
    user_id: String,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let priority = PRIORITIES[rand::thread_rng().gen_range(0..PRIORITIES.len())];
                let id = Uuid::new_v4().to_string();
                let record = NotificationRecord::new(id, clock.now(), user_id.clone())
                    .with_kind("demo")
                    .with_priority(priority);
                debug!(id = %record.id, ?priority, "Upstream emitting demo record");
                upstream.emit(record);
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn rotate_loop(peers: Vec<PeerHandle>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    if peers.len() < 2 {
        return;
    }
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let mut visible = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let next = (visible + 1) % peers.len();
                let hidden = peers[visible].set_visible(false);
                let shown = peers[next].set_visible(true);
                if hidden.is_err() || shown.is_err() {
                    warn!("Peer stopped during visibility rotation");
                    break;
                }
                info!(
                    from = %peers[visible].peer_id(),
                    to = %peers[next].peer_id(),
                    "Rotated visible peer"
                );
                visible = next;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn stats_loop(
    peers: Vec<PeerHandle>,
    bus: Arc<InMemoryPeerBus>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&peers, &bus),
            _ = shutdown.changed() => break,
        }
    }
}

fn report(peers: &[PeerHandle], bus: &InMemoryPeerBus) {
    let mut leaders = 0;
    for peer in peers {
        let snapshot = peer.snapshot();
        if snapshot.is_leader {
            leaders += 1;
        }
        log_peer_event!(
            info,
            "runtime",
            "Peer status",
            snapshot.peer_id,
            leader = snapshot.is_leader,
            visible = snapshot.visible,
            state = %snapshot.connection_state,
            unread = snapshot.unread_count,
            records = snapshot.records.len()
        );
    }
    if leaders > 1 {
        warn!(leaders, "More than one peer claims leadership");
    }
    metrics::set_bus_rejected(bus.frames_rejected());
    match herald_telemetry::export_text() {
        Ok(text) => debug!(bytes = text.len(), "Metrics snapshot rendered"),
        Err(error) => warn!(%error, "Metrics export failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(peers: usize) -> RuntimeConfig {
        RuntimeConfig {
            peers,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_leader_and_it_connects() {
        let host = HeraldHost::start(config(3)).unwrap();
        let first = host.peers()[0].clone();
        first.wait_until(|s| s.is_leader && s.connected).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let leaders = host.peers().iter().filter(|p| p.snapshot().is_leader).count();
        assert_eq!(leaders, 1);
        assert_eq!(host.upstream().open_channels(), 1);

        host.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_records_reach_hidden_peers() {
        let host = HeraldHost::start(config(2)).unwrap();
        let hidden = host.peers()[1].clone();
        host.peers()[0].wait_until(|s| s.connected).await.unwrap();

        let snapshot = hidden.wait_until(|s| s.unread_count >= 1).await.unwrap();
        assert!(!snapshot.visible);
        assert!(!snapshot.is_leader);

        host.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_store_holds_shared_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            peers: 1,
            store_dir: Some(dir.path().to_path_buf()),
            ..RuntimeConfig::default()
        };
        let host = HeraldHost::start(config).unwrap();
        host.peers()[0]
            .wait_until(|s| s.unread_count >= 1)
            .await
            .unwrap();
        host.shutdown().await.unwrap();

        assert!(dir.path().join("herald.state.json").exists());
        assert!(dir.path().join("herald.notices.json").exists());
    }
}
