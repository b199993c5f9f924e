//! Election timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Leader record rewrite and heartbeat broadcast period.
    #[serde(with = "shared_types::millis")]
    pub heartbeat_interval: Duration,
    /// Age beyond which a leader record is abandoned.
    #[serde(with = "shared_types::millis")]
    pub leader_timeout: Duration,
    /// Wait after becoming visible before contending.
    #[serde(with = "shared_types::millis")]
    pub settle_delay: Duration,
    /// Wait after the leader announces it went inactive.
    #[serde(with = "shared_types::millis")]
    pub takeover_delay: Duration,
    /// Upper bound of the random extra wait added to `takeover_delay`.
    #[serde(with = "shared_types::millis")]
    pub takeover_jitter: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(8_000),
            leader_timeout: Duration::from_millis(20_000),
            settle_delay: Duration::from_millis(500),
            takeover_delay: Duration::from_millis(1_000),
            takeover_jitter: Duration::from_millis(250),
        }
    }
}

impl ElectionConfig {
    pub fn development() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(4_000),
            leader_timeout: Duration::from_millis(10_000),
            ..Self::default()
        }
    }

    /// Period of the follower's leader-record check.
    pub fn leader_check_interval(&self) -> Duration {
        self.leader_timeout / 2
    }

    /// A heartbeat must land at least twice per timeout window.
    pub fn heartbeat_is_safe(&self) -> bool {
        self.heartbeat_interval * 2 < self.leader_timeout
    }
}
