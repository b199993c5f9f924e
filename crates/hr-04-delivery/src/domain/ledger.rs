//! Notice ledger: ids already surfaced as new-notification signals.
//!
//! The ledger lives under [`NOTICES_KEY`] in the shared record store, so
//! every peer of the origin sees what any other peer already surfaced. A
//! local copy keeps working when the store is unavailable.

use hr_02_leader_election::ports::{read_json, write_json};
use hr_02_leader_election::{SharedRecordStore, NOTICES_KEY};
use serde::{Deserialize, Serialize};
use shared_types::{StorageError, Timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeEntry {
    pub id: String,
    pub timestamp: Timestamp,
}

pub struct NoticeLedger {
    store: Arc<dyn SharedRecordStore>,
    retention: Duration,
    entries: Vec<NoticeEntry>,
}

impl NoticeLedger {
    pub fn new(store: Arc<dyn SharedRecordStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Pull entries written by other peers and drop expired ones.
    pub fn sync(&mut self, now: Timestamp) {
        match read_json::<Vec<NoticeEntry>>(self.store.as_ref(), NOTICES_KEY) {
            Ok(Some(shared)) => {
                let known: HashSet<String> = self.entries.iter().map(|e| e.id.clone()).collect();
                self.entries
                    .extend(shared.into_iter().filter(|entry| !known.contains(&entry.id)));
            }
            Ok(None) => {}
            Err(error) => debug!(%error, "Notice ledger unreadable, using local copy"),
        }
        self.prune(now);
    }

    /// Record that `id` was surfaced at `now`. Returns `false` if some peer
    /// already surfaced it.
    pub fn record(&mut self, id: &str, now: Timestamp) -> bool {
        self.sync(now);
        if self.contains(id) {
            return false;
        }
        self.entries.push(NoticeEntry {
            id: id.to_string(),
            timestamp: now,
        });
        self.persist();
        true
    }

    fn prune(&mut self, now: Timestamp) {
        let cutoff = now.saturating_sub(self.retention);
        self.entries.retain(|entry| entry.timestamp >= cutoff);
    }

    fn persist(&mut self) {
        match write_json(self.store.as_ref(), NOTICES_KEY, &self.entries) {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded { .. }) => {
                // Keep the newest half; a notice may be repeated, never lost.
                let keep = self.entries.len() / 2;
                let drop = self.entries.len() - keep;
                self.entries.drain(..drop);
                if let Err(error) = write_json(self.store.as_ref(), NOTICES_KEY, &self.entries) {
                    warn!(%error, "Notice ledger not persisted");
                }
            }
            Err(error) => warn!(%error, "Notice ledger not persisted"),
        }
    }
}
