//! Cached store snapshot under [`STATE_KEY`].
//!
//! Written after each store mutation and read once at peer start, so a new
//! peer shows records before its first refresh completes.

use hr_01_event_store::StoreSnapshot;
use hr_02_leader_election::ports::{read_json, write_json};
use hr_02_leader_election::{SharedRecordStore, STATE_KEY};
use serde::{Deserialize, Serialize};
use shared_types::{NotificationRecord, StorageError, Timestamp};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedState {
    records: Vec<NotificationRecord>,
    unread_count: u64,
    timestamp: Timestamp,
}

/// What [`SnapshotCache::save`] managed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Saved,
    /// Quota hit: only the unread count was kept.
    Minimized,
    /// Not written this time; persistence stays on.
    Skipped,
    /// Persistence is off for the rest of this peer's life.
    Disabled,
}

pub struct SnapshotCache {
    store: Arc<dyn SharedRecordStore>,
    enabled: bool,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn SharedRecordStore>) -> Self {
        Self {
            store,
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn load(&self) -> Option<StoreSnapshot> {
        match read_json::<CachedState>(self.store.as_ref(), STATE_KEY) {
            Ok(Some(cached)) => {
                debug!(
                    records = cached.records.len(),
                    at = %cached.timestamp,
                    "Cached snapshot loaded"
                );
                Some(StoreSnapshot {
                    records: cached.records,
                    unread_count: cached.unread_count,
                })
            }
            Ok(None) => None,
            Err(error) => {
                warn!(%error, "Cached snapshot unreadable");
                None
            }
        }
    }

    pub fn save(&mut self, snapshot: &StoreSnapshot, now: Timestamp) -> CacheWrite {
        if !self.enabled {
            return CacheWrite::Disabled;
        }
        let state = CachedState {
            records: snapshot.records.clone(),
            unread_count: snapshot.unread_count,
            timestamp: now,
        };
        match write_json(self.store.as_ref(), STATE_KEY, &state) {
            Ok(()) => CacheWrite::Saved,
            Err(StorageError::QuotaExceeded { .. }) => self.save_minimized(state),
            Err(error) => {
                warn!(%error, "Snapshot not cached");
                CacheWrite::Skipped
            }
        }
    }

    fn save_minimized(&mut self, mut state: CachedState) -> CacheWrite {
        warn!(records = state.records.len(), "Storage quota exceeded, caching count only");
        if let Err(error) = self.store.remove(STATE_KEY) {
            debug!(%error, "Could not clear cached snapshot");
        }
        state.records.clear();
        match write_json(self.store.as_ref(), STATE_KEY, &state) {
            Ok(()) => CacheWrite::Minimized,
            Err(error) => {
                error!(%error, "Snapshot caching disabled, continuing without it");
                self.enabled = false;
                CacheWrite::Disabled
            }
        }
    }
}
