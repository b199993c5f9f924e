//! # Election Properties
//!
//! Checked on the deterministic simulation, so every run replays exactly.

#[cfg(test)]
mod tests {
    use hr_04_delivery::testing::{SimConfig, Simulation};
    use shared_types::ConnectionState;
    use std::time::Duration;

    fn sim(peers: usize) -> Simulation {
        Simulation::new(SimConfig {
            peers,
            ..SimConfig::default()
        })
    }

    #[test]
    fn test_concurrent_claims_converge_to_one_leader() {
        let mut sim = sim(5);
        // Nobody sees anyone else's claim at start.
        sim.store().set_blind(true);
        sim.start_all(true);
        sim.store().set_blind(false);
        assert_eq!(sim.leaders().len(), 5);

        let heartbeat = sim.config().peer.election.heartbeat_interval;
        sim.run_for(heartbeat * 2);
        assert_eq!(sim.leaders().len(), 1);

        sim.run_for(Duration::from_secs(120));
        assert_eq!(sim.leaders().len(), 1);
        assert!(sim.max_concurrent_channels() <= 1);
    }

    #[test]
    fn test_unreadable_store_still_settles_on_one_leader() {
        let mut sim = sim(3);
        sim.store().inner().set_unavailable(true);
        sim.start_all(true);

        let settled = sim.run_until_true(Duration::from_secs(60), |s| {
            s.leaders().len() == 1
                && s.peer(s.leaders()[0]).connection_state() == ConnectionState::Connected
        });
        assert!(settled.is_some(), "no single leader over the bus alone");

        let leader = sim.leaders();
        sim.run_for(Duration::from_secs(120));
        assert_eq!(sim.leaders(), leader);
        assert_eq!(sim.server_channels(), 1);

        let record = sim.new_record("bus-only");
        sim.emit(record);
        sim.run_for(Duration::from_millis(200));
        for index in 0..sim.peer_count() {
            assert!(sim.peer(index).store().contains("bus-only"), "peer {index} missed it");
        }
    }

    #[test]
    fn test_followers_agree_on_leader() {
        let mut sim = sim(4);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(30));

        let leader = sim.leaders();
        assert_eq!(leader.len(), 1);
        let leader_id = sim.peer(leader[0]).peer_id().clone();
        for index in 0..sim.peer_count() {
            assert_eq!(sim.peer(index).known_leader(), Some(&leader_id));
        }
    }

    #[test]
    fn test_hidden_leader_hands_off() {
        let mut sim = sim(2);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));
        assert_eq!(sim.leaders(), vec![0]);
        assert_eq!(sim.peer(0).connection_state(), ConnectionState::Connected);

        let hidden_at = sim.now();
        sim.set_visible(0, false);
        assert!(!sim.peer(0).is_leader());
        assert!(!sim.peer(0).has_open_channel());
        assert_eq!(sim.server_channels(), 0);

        let limit = {
            let election = &sim.config().peer.election;
            election.leader_timeout + election.settle_delay
        };
        let taken_over = sim
            .run_until_true(limit, |s| {
                s.leaders() == vec![1] && s.peer(1).connection_state() == ConnectionState::Connected
            })
            .expect("follower never took over");
        assert!(taken_over.since(hidden_at) <= limit);
        assert_eq!(sim.max_concurrent_channels(), 1);
        assert_eq!(sim.server_channels(), 1);
    }

    #[test]
    fn test_no_visible_peer_means_no_leader() {
        let mut sim = sim(3);
        sim.start_all(false);
        sim.run_for(Duration::from_secs(60));
        assert!(sim.leaders().is_empty());
        assert_eq!(sim.upstream().push_opens, 0);

        sim.set_visible(2, true);
        let settle = sim.config().peer.election.settle_delay;
        sim.run_for(settle + Duration::from_secs(1));
        assert_eq!(sim.leaders(), vec![2]);
        assert_eq!(sim.channel_holders(), vec![2]);
    }

    #[test]
    fn test_shutdown_leader_releases_slot_quickly() {
        let mut sim = sim(2);
        sim.start_all(true);
        sim.run_for(Duration::from_secs(1));
        sim.shutdown(0);
        assert!(sim.peer(0).is_stopped());

        let limit = {
            let election = &sim.config().peer.election;
            election.takeover_delay + election.takeover_jitter + Duration::from_millis(100)
        };
        let taken_over = sim.run_until_true(limit, |s| s.leaders() == vec![1]);
        assert!(taken_over.is_some());
    }
}
