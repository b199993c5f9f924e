//! # Simulated Origin Scenarios
//!
//! Several peers of one origin on a virtual clock. Only the leader talks
//! to the upstream; everything the followers know arrives over the bus.

#[cfg(test)]
mod tests {
    use hr_04_delivery::testing::{SimConfig, Simulation};
    use hr_04_delivery::PeerCommand;
    use shared_types::{ConnectionState, Priority};
    use std::time::Duration;

    fn origin(peers: usize) -> Simulation {
        let mut sim = Simulation::new(SimConfig {
            peers,
            ..SimConfig::default()
        });
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));
        sim
    }

    fn copies(sim: &Simulation, peer: usize, id: &str) -> usize {
        sim.peer(peer)
            .store()
            .records()
            .iter()
            .filter(|r| r.id == id)
            .count()
    }

    #[test]
    fn test_leader_record_reaches_follower_once() {
        let mut sim = origin(2);
        assert_eq!(sim.leaders(), vec![0]);

        let record = sim.new_record("n1").with_priority(Priority::Urgent);
        sim.emit(record);
        sim.run_for(Duration::from_millis(200));
        for peer in 0..2 {
            assert_eq!(copies(&sim, peer, "n1"), 1);
            assert_eq!(sim.peer(peer).store().unread_count(), 1);
        }

        // The debounced refresh and its broadcast keep both views identical.
        sim.run_for(Duration::from_secs(5));
        for peer in 0..2 {
            assert_eq!(copies(&sim, peer, "n1"), 1);
            assert_eq!(sim.peer(peer).store().unread_count(), 1);
            assert_eq!(
                sim.peer(peer).store().get("n1").map(|r| r.priority),
                Some(Priority::Urgent)
            );
        }
    }

    #[test]
    fn test_followers_see_leader_connection() {
        let sim = origin(3);
        for peer in 1..3 {
            let snapshot = sim.peer(peer).snapshot();
            assert!(!snapshot.is_leader);
            assert!(snapshot.connected);
            assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_mark_read_on_follower_propagates() {
        let mut sim = origin(3);
        for id in ["n1", "n2"] {
            let record = sim.new_record(id);
            sim.emit(record);
            sim.run_for(Duration::from_millis(10));
        }
        sim.run_for(Duration::from_secs(5));

        sim.command(2, PeerCommand::MarkRead(vec!["n1".to_string()]));
        sim.run_for(Duration::from_millis(100));

        for peer in 0..3 {
            let store = sim.peer(peer).store();
            assert!(store.get("n1").unwrap().is_read, "peer {peer} still unread");
            assert!(!store.get("n2").unwrap().is_read);
            assert_eq!(store.unread_count(), 1);
        }
        assert!(sim.upstream().records.iter().any(|r| r.id == "n1" && r.is_read));
    }

    #[test]
    fn test_mark_all_read_clears_every_peer() {
        let mut sim = origin(2);
        for id in ["n1", "n2", "n3"] {
            let record = sim.new_record(id);
            sim.emit(record);
        }
        sim.run_for(Duration::from_secs(3));

        sim.command(1, PeerCommand::MarkAllRead);
        sim.run_for(Duration::from_millis(100));
        for peer in 0..2 {
            assert_eq!(sim.peer(peer).store().unread_count(), 0);
        }

        // A later reconciliation does not resurrect anything.
        sim.command(0, PeerCommand::Refresh);
        sim.run_for(Duration::from_millis(100));
        for peer in 0..2 {
            assert_eq!(sim.peer(peer).store().unread_count(), 0);
        }
    }

    #[test]
    fn test_record_surfaced_once_across_peers() {
        let mut sim = Simulation::new(SimConfig {
            peers: 2,
            ..SimConfig::default()
        });
        sim.start(0, true);
        sim.start(1, false);
        sim.run_for(Duration::from_secs(1));

        let record = sim.new_record("n1");
        sim.emit(record);
        sim.run_for(Duration::from_millis(200));
        assert_eq!(sim.surfaced(0), vec!["n1".to_string()]);
        assert!(sim.surfaced(1).is_empty());

        // Coming to the foreground replays unseen records, minus the ledger.
        sim.set_visible(1, true);
        sim.run_for(Duration::from_secs(1));
        assert!(sim.surfaced(1).is_empty());
    }

    #[test]
    fn test_returning_peer_catches_up_by_refresh() {
        let mut sim = Simulation::new(SimConfig {
            peers: 2,
            ..SimConfig::default()
        });
        sim.start(0, true);
        sim.start(1, true);
        sim.run_for(Duration::from_secs(1));
        sim.set_visible(1, false);
        sim.set_visible(0, false);
        sim.run_for(Duration::from_millis(10));

        // Nobody visible: no leader, nothing delivered.
        let record = sim.new_record("n1");
        sim.emit(record);
        sim.run_for(Duration::from_secs(1));
        assert!(sim.leaders().is_empty());
        assert!(!sim.peer(1).store().contains("n1"));

        // Peer 1 returns, leads, and picks up the record by refresh.
        sim.set_visible(1, true);
        sim.command(1, PeerCommand::Refresh);
        sim.run_for(Duration::from_secs(2));
        assert_eq!(sim.leaders(), vec![1]);
        assert!(sim.peer(1).store().contains("n1"));
        assert!(sim.peer(0).store().contains("n1"));
    }

    #[test]
    fn test_takeover_after_crash_resumes_delivery() {
        let mut sim = origin(3);
        sim.crash(0);

        // Created while nobody holds a channel.
        let record = sim.new_record("during-gap");
        sim.emit(record);

        let reached = sim.run_until_true(Duration::from_secs(60), |s| {
            s.leaders().len() == 1
                && s.peer(s.leaders()[0]).connection_state() == ConnectionState::Connected
        });
        assert!(reached.is_some());
        let leader = sim.leaders()[0];
        assert_ne!(leader, 0);

        sim.run_for(Duration::from_millis(200));
        for peer in 1..3 {
            assert_eq!(copies(&sim, peer, "during-gap"), 1, "peer {peer} lost the gap record");
        }
        assert_eq!(sim.surfaced(leader), vec!["during-gap".to_string()]);

        let record = sim.new_record("after-crash");
        sim.emit(record);
        sim.run_for(Duration::from_millis(200));
        for peer in 1..3 {
            assert_eq!(copies(&sim, peer, "after-crash"), 1);
        }
        assert!(!sim.peer(0).store().contains("after-crash"));
        assert!(sim.max_concurrent_channels() <= 1);
    }
}
