//! # Runtime Scenarios
//!
//! Peers driven by `PeerRuntime` on tokio, talking over the in-memory bus
//! to a scripted upstream. Time is paused, so timers advance instantly.

#[cfg(test)]
mod tests {
    use hr_02_leader_election::InMemoryRecordStore;
    use hr_04_delivery::adapters::ScriptedUpstream;
    use hr_04_delivery::{
        DeliveryApi, Peer, PeerConfig, PeerEvent, PeerHandle, PeerRuntime, RuntimeContext,
        TokioTimeSource,
    };
    use shared_bus::{InMemoryPeerBus, MessageFilter};
    use shared_types::{NotificationRecord, PeerId, Priority, TimeSource, Timestamp};
    use std::sync::Arc;
    use std::time::Duration;

    struct Origin {
        bus: Arc<InMemoryPeerBus>,
        store: Arc<InMemoryRecordStore>,
        upstream: ScriptedUpstream,
        clock: Arc<TokioTimeSource>,
    }

    impl Origin {
        fn new() -> Self {
            Self {
                bus: Arc::new(InMemoryPeerBus::new()),
                store: Arc::new(InMemoryRecordStore::new()),
                upstream: ScriptedUpstream::new(),
                clock: Arc::new(TokioTimeSource::starting_at(Timestamp(1_700_000_000_000))),
            }
        }

        fn spawn(&self, id: &str, seed: u64, visible: bool) -> PeerHandle {
            let peer_id = PeerId::from(id);
            let peer = Peer::new(
                peer_id.clone(),
                "u1",
                PeerConfig::development(),
                self.store.clone(),
                seed,
            );
            let context = RuntimeContext {
                bus: self.bus.clone(),
                subscription: self.bus.subscribe(MessageFilter::for_peer(peer_id)),
                upstream: Arc::new(self.upstream.clone()),
                clock: self.clock.clone(),
            };
            PeerRuntime::spawn(peer, context, visible)
        }

        fn record(&self, id: &str) -> NotificationRecord {
            NotificationRecord::new(id, self.clock.now(), "u1")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_urgent_record_shared_with_follower() {
        let origin = Origin::new();
        let a = origin.spawn("peer-a", 1, true);
        a.wait_until(|s| s.is_leader && s.connected).await.unwrap();
        let b = origin.spawn("peer-b", 2, true);
        b.wait_until(|s| !s.is_leader && s.connected).await.unwrap();

        origin
            .upstream
            .emit(origin.record("n1").with_priority(Priority::Urgent));

        for peer in [&a, &b] {
            let snapshot = peer.wait_until(|s| s.unread_count == 1).await.unwrap();
            assert_eq!(snapshot.records.len(), 1);
            assert_eq!(snapshot.records[0].id, "n1");
            assert_eq!(snapshot.records[0].priority, Priority::Urgent);
        }
        assert_eq!(origin.upstream.open_channels(), 1);

        b.shutdown().await.unwrap();
        a.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_handoff_moves_the_channel() {
        let origin = Origin::new();
        let a = origin.spawn("peer-a", 1, true);
        a.wait_until(|s| s.is_leader && s.connected).await.unwrap();
        let b = origin.spawn("peer-b", 2, true);
        b.wait_until(|s| s.connected).await.unwrap();

        a.set_visible(false).unwrap();
        a.wait_until(|s| !s.is_leader).await.unwrap();
        let snapshot = b.wait_until(|s| s.is_leader && s.connected).await.unwrap();
        assert!(!snapshot.using_polling_fallback);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(origin.upstream.open_channels(), 1);

        origin.upstream.emit(origin.record("n1"));
        a.wait_until(|s| s.unread_count == 1).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_reaches_upstream_and_peers() {
        let origin = Origin::new();
        let a = origin.spawn("peer-a", 1, true);
        a.wait_until(|s| s.is_leader && s.connected).await.unwrap();
        let b = origin.spawn("peer-b", 2, false);

        origin.upstream.emit(origin.record("n1"));
        b.wait_until(|s| s.unread_count == 1).await.unwrap();

        b.request_mark_read(vec!["n1".to_string()]).unwrap();
        a.wait_until(|s| s.unread_count == 0).await.unwrap();
        assert!(a.snapshot().records[0].is_read);
        assert_eq!(origin.upstream.mark_read_calls(), vec![vec!["n1".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_notification_event_fires_once() {
        let origin = Origin::new();
        let a = origin.spawn("peer-a", 1, true);
        a.wait_until(|s| s.is_leader && s.connected).await.unwrap();
        let b = origin.spawn("peer-b", 2, true);
        b.wait_until(|s| s.connected).await.unwrap();
        let mut a_events = a.events();
        let mut b_events = b.events();

        origin.upstream.emit(origin.record("n1"));
        a.wait_until(|s| s.unread_count == 1).await.unwrap();
        b.wait_until(|s| s.unread_count == 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut surfaced = 0;
        for events in [&mut a_events, &mut b_events] {
            while let Ok(event) = events.try_recv() {
                if matches!(event, PeerEvent::NewNotification(ref r) if r.id == "n1") {
                    surfaced += 1;
                }
            }
        }
        assert_eq!(surfaced, 1);
    }
}
