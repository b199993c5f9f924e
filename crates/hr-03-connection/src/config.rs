//! Connection manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Deadline for the push channel handshake.
    #[serde(with = "shared_types::millis")]
    pub connection_timeout: Duration,
    /// Silence on an established push channel before it is presumed dead.
    /// Every record and keepalive resets it.
    #[serde(with = "shared_types::millis")]
    pub liveness_timeout: Duration,
    #[serde(with = "shared_types::millis")]
    pub base_reconnect_delay: Duration,
    #[serde(with = "shared_types::millis")]
    pub reconnect_delay_cap: Duration,
    /// Consecutive push failures before falling back to polling.
    pub max_push_failures: u32,
    /// Reconnect attempts before falling back to polling.
    pub max_reconnect_attempts: u32,
    #[serde(with = "shared_types::millis")]
    pub polling_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(60),
            base_reconnect_delay: Duration::from_millis(1_000),
            reconnect_delay_cap: Duration::from_millis(10_000),
            max_push_failures: 3,
            max_reconnect_attempts: 5,
            polling_interval: Duration::from_millis(15_000),
        }
    }
}

impl ConnectionConfig {
    pub fn development() -> Self {
        Self {
            connection_timeout: Duration::from_secs(15),
            liveness_timeout: Duration::from_secs(30),
            base_reconnect_delay: Duration::from_millis(500),
            polling_interval: Duration::from_millis(10_000),
            ..Self::default()
        }
    }
}
