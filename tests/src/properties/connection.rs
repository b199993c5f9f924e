//! # Connection Properties
//!
//! Backoff is bounded and monotone, and repeated push failures end in
//! polling rather than an endless reconnect loop.

#[cfg(test)]
mod tests {
    use hr_03_connection::{Backoff, ConnectionConfig};
    use hr_04_delivery::testing::{PushBehavior, SimConfig, Simulation};
    use hr_04_delivery::PeerConfig;
    use proptest::prelude::*;
    use shared_types::ConnectionState;
    use std::time::Duration;

    fn failing_sim(peer: PeerConfig) -> Simulation {
        let mut sim = Simulation::new(SimConfig {
            peers: 1,
            peer,
            ..SimConfig::default()
        });
        sim.upstream_mut().push = PushBehavior::FailAlways;
        sim.start_all(true);
        sim
    }

    fn assert_monotone_and_capped(delays: &[Duration], cap: Duration) {
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "delays decreased: {delays:?}");
        }
        assert!(delays.iter().all(|d| *d <= cap), "delay above cap: {delays:?}");
    }

    proptest! {
        #[test]
        fn prop_backoff_monotone_and_capped(base_ms in 1u64..5_000, cap_ms in 1u64..60_000) {
            let cap = Duration::from_millis(cap_ms);
            let backoff = Backoff::new(Duration::from_millis(base_ms), cap);
            let delays: Vec<_> = (0..40).map(|attempt| backoff.delay(attempt)).collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            prop_assert!(delays.iter().all(|d| *d <= cap));
        }
    }

    #[test]
    fn test_falls_back_after_configured_failures() {
        let mut sim = failing_sim(PeerConfig::default());
        let connection = sim.config().peer.connection.clone();

        let reached = sim.run_until_true(Duration::from_secs(60), |s| {
            s.peer(0).connection_state() == ConnectionState::PollingFallback
        });
        assert!(reached.is_some());
        assert_eq!(sim.upstream().push_opens, u64::from(connection.max_push_failures));
        assert_eq!(sim.peer(0).connection().failure_count(), connection.max_push_failures);

        let delays = sim.peer(0).connection().reconnect_delays().to_vec();
        assert_eq!(delays.len() as u32, connection.max_push_failures - 1);
        assert_eq!(delays[0], connection.base_reconnect_delay);
        assert_monotone_and_capped(&delays, connection.reconnect_delay_cap);

        // Polling continues and no further push attempts are made.
        sim.run_for(connection.polling_interval * 3);
        assert_eq!(sim.upstream().push_opens, u64::from(connection.max_push_failures));
        assert!(sim.upstream().polls >= 3);
        assert!(sim.peer(0).has_open_channel());
    }

    #[test]
    fn test_long_retry_sequence_hits_cap() {
        let peer = PeerConfig {
            connection: ConnectionConfig {
                max_push_failures: 10,
                max_reconnect_attempts: 10,
                ..ConnectionConfig::default()
            },
            ..PeerConfig::default()
        };
        let mut sim = failing_sim(peer);
        let connection = sim.config().peer.connection.clone();

        let reached = sim.run_until_true(Duration::from_secs(180), |s| {
            s.peer(0).connection_state() == ConnectionState::PollingFallback
        });
        assert!(reached.is_some());

        let delays = sim.peer(0).connection().reconnect_delays().to_vec();
        assert_eq!(delays.len(), 9);
        assert_monotone_and_capped(&delays, connection.reconnect_delay_cap);
        assert_eq!(delays.last(), Some(&connection.reconnect_delay_cap));
    }

    #[test]
    fn test_hanging_handshake_times_out() {
        let mut sim = Simulation::new(SimConfig {
            peers: 1,
            ..SimConfig::default()
        });
        sim.upstream_mut().push = PushBehavior::Hang;
        sim.start_all(true);

        let timeout = sim.config().peer.connection.connection_timeout;
        sim.run_for(timeout - Duration::from_millis(100));
        assert_eq!(sim.peer(0).connection_state(), ConnectionState::Connecting);
        sim.run_for(Duration::from_millis(200));
        assert_eq!(sim.peer(0).connection_state(), ConnectionState::Reconnecting);
        assert_eq!(sim.peer(0).connection().failure_count(), 1);
    }

    #[test]
    fn test_retry_push_leaves_polling() {
        let mut sim = failing_sim(PeerConfig::default());
        sim.run_until_true(Duration::from_secs(60), |s| {
            s.peer(0).connection_state() == ConnectionState::PollingFallback
        })
        .expect("never fell back");

        sim.upstream_mut().push = PushBehavior::Accept;
        sim.command(0, hr_04_delivery::PeerCommand::RetryPush);
        sim.run_for(Duration::from_secs(1));
        assert_eq!(sim.peer(0).connection_state(), ConnectionState::Connected);
        assert_eq!(sim.server_channels(), 1);
    }
}
