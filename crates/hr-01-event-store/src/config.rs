//! Event store configuration.

use serde::{Deserialize, Serialize};

/// Records kept in memory, newest first.
pub const DEFAULT_MAX_RECORDS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size bound; the oldest records beyond it are evicted.
    pub max_records: usize,
    /// How many ids are remembered as already ingested, including evicted
    /// ones. Keeps re-delivery of an evicted record a no-op.
    pub seen_window: usize,
    /// How many locally-read ids are remembered after eviction.
    pub read_mark_window: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_max_records(DEFAULT_MAX_RECORDS)
    }
}

impl StoreConfig {
    /// Bound the store at `max_records`, sizing both windows at four times that.
    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            max_records,
            seen_window: max_records.saturating_mul(4),
            read_mark_window: max_records.saturating_mul(4),
        }
    }
}
