//! # Peer Configuration
//!
//! Aggregates the per-component configs with the coordinator's own timings.
//! `Default` is the production profile; [`PeerConfig::development`] shortens
//! intervals for local work.

use hr_01_event_store::StoreConfig;
use hr_02_leader_election::ElectionConfig;
use hr_03_connection::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("heartbeat {heartbeat_ms}ms must be below half the leader timeout {timeout_ms}ms")]
    HeartbeatTooSlow { heartbeat_ms: u64, timeout_ms: u64 },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("unknown profile {0:?} (expected \"production\" or \"development\")")]
    UnknownProfile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub election: ElectionConfig,
    pub connection: ConnectionConfig,
    pub store: StoreConfig,
    /// Quiet period after a new upstream record before the leader refreshes.
    #[serde(with = "shared_types::millis")]
    pub refresh_debounce: Duration,
    /// Leader's periodic full refresh that reconciles the unread counter.
    #[serde(with = "shared_types::millis")]
    pub reconcile_interval: Duration,
    /// Unshown records younger than this are surfaced when push connects.
    #[serde(with = "shared_types::millis")]
    pub unshown_window: Duration,
    /// How long surfaced ids stay in the notice ledger.
    #[serde(with = "shared_types::millis")]
    pub notice_retention: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            election: ElectionConfig::default(),
            connection: ConnectionConfig::default(),
            store: StoreConfig::default(),
            refresh_debounce: Duration::from_millis(1_000),
            reconcile_interval: Duration::from_secs(300),
            unshown_window: Duration::from_secs(3_600),
            notice_retention: Duration::from_secs(86_400),
        }
    }
}

impl PeerConfig {
    pub fn development() -> Self {
        Self {
            election: ElectionConfig::development(),
            connection: ConnectionConfig::development(),
            refresh_debounce: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Resolve a named profile.
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        match profile.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::default()),
            "development" | "dev" => Ok(Self::development()),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("heartbeat_interval", self.election.heartbeat_interval),
            ("leader_timeout", self.election.leader_timeout),
            ("connection_timeout", self.connection.connection_timeout),
            ("liveness_timeout", self.connection.liveness_timeout),
            ("base_reconnect_delay", self.connection.base_reconnect_delay),
            ("polling_interval", self.connection.polling_interval),
            ("reconcile_interval", self.reconcile_interval),
        ];
        if let Some((name, _)) = intervals.into_iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroValue(name));
        }
        if self.connection.max_push_failures == 0 {
            return Err(ConfigError::ZeroValue("max_push_failures"));
        }
        if self.store.max_records == 0 {
            return Err(ConfigError::ZeroValue("max_records"));
        }
        if !self.election.heartbeat_is_safe() {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat_ms: self.election.heartbeat_interval.as_millis() as u64,
                timeout_ms: self.election.leader_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}
