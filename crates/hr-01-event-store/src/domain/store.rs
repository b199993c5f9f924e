//! The per-peer event store.
//!
//! Holds at most `max_records` notification records in display order with
//! unique ids, plus an unread counter that is tracked independently of the
//! records it can see:
//!
//! | Operation           | `unread_count` becomes                          |
//! |---------------------|-------------------------------------------------|
//! | `ingest` (unread)   | `+1`                                            |
//! | `merge` / peer sync | reported count, minus records kept read locally |
//! | `mark_read`         | exact count of unread records held locally      |
//! | `mark_all_read`     | `0`                                             |
//!
//! Read state is monotonic: once a record is read locally, no later ingest,
//! merge, or peer update turns it unread again.

use super::audience::AudienceFilter;
use super::ordering::sort_records;
use super::recent::RecentIds;
use crate::config::StoreConfig;
use serde::{Deserialize, Serialize};
use shared_types::{NotificationRecord, RefreshBatch, Timestamp};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, trace};

/// Result of [`EventStore::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting of this id; the record was inserted.
    Inserted,
    /// The id is already held or was held recently. Nothing changed.
    Duplicate,
    /// The record failed the audience filter. Nothing changed.
    Filtered,
}

impl IngestOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, IngestOutcome::Inserted)
    }
}

/// What a bulk merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub first_load: bool,
    pub added: usize,
    pub updated: usize,
    pub filtered: usize,
}

/// Read-only view handed to the host and broadcast to peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub records: Vec<NotificationRecord>,
    pub unread_count: u64,
}

struct AdmittedBatch {
    records: Vec<NotificationRecord>,
    filtered: usize,
    kept_read: u64,
}

pub struct EventStore {
    config: StoreConfig,
    audience: AudienceFilter,
    records: Vec<NotificationRecord>,
    unread_count: u64,
    loaded: bool,
    seen: RecentIds,
    read_marks: RecentIds,
}

impl EventStore {
    pub fn new(config: StoreConfig, audience: AudienceFilter) -> Self {
        Self {
            seen: RecentIds::new(config.seen_window),
            read_marks: RecentIds::new(config.read_mark_window),
            config,
            audience,
            records: Vec::new(),
            unread_count: 0,
            loaded: false,
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// `true` once a full refresh or a peer update has replaced the store.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn audience(&self) -> &AudienceFilter {
        &self.audience
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            records: self.records.clone(),
            unread_count: self.unread_count,
        }
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Insert a single record delivered by the upstream or by a peer.
    ///
    /// Idempotent per id, including ids evicted within the seen window.
    pub fn ingest(&mut self, mut record: NotificationRecord) -> IngestOutcome {
        if !self.audience.admits(&record) {
            debug!(id = %record.id, "Record outside audience, dropped");
            return IngestOutcome::Filtered;
        }
        if self.seen.contains(&record.id) || self.contains(&record.id) {
            trace!(id = %record.id, "Duplicate record ignored");
            return IngestOutcome::Duplicate;
        }

        self.keep_read(&mut record);
        let unread = !record.is_read;
        self.seen.insert(&record.id);
        self.records.push(record);
        self.reorder();
        if unread {
            self.unread_count += 1;
        }
        IngestOutcome::Inserted
    }

    /// Apply a full-refresh result.
    ///
    /// The first load replaces the store. Later loads upsert by id (the
    /// refreshed record wins) and keep records the refresh did not return.
    /// Either way the unread count is taken from the batch.
    pub fn merge(&mut self, batch: RefreshBatch) -> MergeSummary {
        let first_load = !self.loaded;
        let admitted = self.admit(batch.records);
        let mut summary = MergeSummary {
            first_load,
            filtered: admitted.filtered,
            ..MergeSummary::default()
        };

        if first_load {
            summary.added = admitted.records.len();
            self.records = admitted.records;
        } else {
            let index: HashMap<String, usize> = self
                .records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.id.clone(), i))
                .collect();
            for record in admitted.records {
                match index.get(&record.id) {
                    Some(&i) => {
                        self.records[i] = record;
                        summary.updated += 1;
                    }
                    None => {
                        self.records.push(record);
                        summary.added += 1;
                    }
                }
            }
        }

        self.loaded = true;
        self.remember_all();
        self.unread_count = batch.unread_count.saturating_sub(admitted.kept_read);
        self.reorder();
        debug!(
            first_load,
            added = summary.added,
            updated = summary.updated,
            unread = self.unread_count,
            "Refresh merged"
        );
        summary
    }

    /// Replace the store with another peer's broadcast state.
    pub fn apply_peer_update(&mut self, records: Vec<NotificationRecord>, unread_count: u64) {
        let admitted = self.admit(records);
        self.records = admitted.records;
        self.loaded = true;
        self.remember_all();
        self.unread_count = unread_count.saturating_sub(admitted.kept_read);
        self.reorder();
    }

    /// Seed an empty, not-yet-loaded store from a cached snapshot.
    ///
    /// The next refresh still counts as the first load. Returns the number
    /// of records taken.
    pub fn seed(&mut self, snapshot: StoreSnapshot) -> usize {
        if self.loaded || !self.records.is_empty() {
            return 0;
        }
        let admitted = self.admit(snapshot.records);
        self.records = admitted.records;
        self.unread_count = snapshot.unread_count.saturating_sub(admitted.kept_read);
        self.remember_all();
        self.reorder();
        self.records.len()
    }

    /// Mark `ids` read and recount unread locally. Returns how many records
    /// changed.
    pub fn mark_read(&mut self, ids: &[String], now: Timestamp) -> usize {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for id in ids {
            self.read_marks.insert(id);
        }
        let changed = self
            .records
            .iter_mut()
            .filter(|r| wanted.contains(r.id.as_str()))
            .map(|r| r.mark_read(now))
            .filter(|changed| *changed)
            .count();
        self.unread_count = self.records.iter().filter(|r| !r.is_read).count() as u64;
        changed
    }

    pub fn mark_all_read(&mut self, now: Timestamp) -> usize {
        let mut changed = 0;
        for record in &mut self.records {
            self.read_marks.insert(&record.id);
            if record.mark_read(now) {
                changed += 1;
            }
        }
        self.unread_count = 0;
        changed
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Filter a batch, drop repeated ids within it, and keep local reads.
    fn admit(&self, records: Vec<NotificationRecord>) -> AdmittedBatch {
        let mut ids = HashSet::with_capacity(records.len());
        let mut admitted = AdmittedBatch {
            records: Vec::with_capacity(records.len()),
            filtered: 0,
            kept_read: 0,
        };
        for mut record in records {
            if !self.audience.admits(&record) {
                admitted.filtered += 1;
                continue;
            }
            if !ids.insert(record.id.clone()) {
                continue;
            }
            if self.keep_read(&mut record) {
                admitted.kept_read += 1;
            }
            admitted.records.push(record);
        }
        admitted
    }

    /// Force `record` read if this peer already read it. Returns `true` if
    /// it had to be changed.
    fn keep_read(&self, record: &mut NotificationRecord) -> bool {
        if record.is_read {
            return false;
        }
        let local = self.get(&record.id).filter(|r| r.is_read);
        if local.is_none() && !self.read_marks.contains(&record.id) {
            return false;
        }
        record.is_read = true;
        record.read_at = local.and_then(|r| r.read_at).or(record.read_at);
        true
    }

    fn remember_all(&mut self) {
        for record in &self.records {
            self.seen.insert(&record.id);
        }
    }

    /// Sort, enforce id uniqueness, and truncate to the size bound.
    fn reorder(&mut self) {
        sort_records(&mut self.records);

        let before = self.records.len();
        let mut ids = HashSet::with_capacity(before);
        self.records.retain(|r| ids.insert(r.id.clone()));
        let repaired = before - self.records.len();
        debug_assert_eq!(repaired, 0, "duplicate record id survived dedup");
        if repaired > 0 {
            error!(repaired, "Duplicate record ids removed from store");
        }

        if self.records.len() > self.config.max_records {
            let evicted = self.records.len() - self.config.max_records;
            self.records.truncate(self.config.max_records);
            trace!(evicted, "Oldest records evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ordering::is_sorted;
    use shared_types::Priority;

    fn store() -> EventStore {
        EventStore::new(StoreConfig::default(), AudienceFilter::new("u1"))
    }

    fn record(id: &str, at: u64) -> NotificationRecord {
        NotificationRecord::new(id, Timestamp(at), "u1")
    }

    #[test]
    fn test_repeated_ingest_counts_once() {
        let mut store = store();
        assert_eq!(store.ingest(record("n1", 1)), IngestOutcome::Inserted);
        for _ in 0..5 {
            assert_eq!(store.ingest(record("n1", 1)), IngestOutcome::Duplicate);
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_read_record_does_not_bump_unread() {
        let mut store = store();
        store.ingest(record("n1", 1).read(Timestamp(2)));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_filtered_record_never_enters() {
        let mut store = store();
        let mut orphan = record("n1", 1);
        orphan.owner_user_id = None;
        assert_eq!(store.ingest(orphan), IngestOutcome::Filtered);
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = store();
        for i in 0..101 {
            store.ingest(record(&format!("n{i}"), 1_000 + i));
        }
        assert_eq!(store.len(), 100);
        assert!(!store.contains("n0"));
        assert!(store.contains("n100"));
        // Counter is not derived from what survived truncation.
        assert_eq!(store.unread_count(), 101);
    }

    #[test]
    fn test_evicted_id_stays_deduplicated() {
        let mut store =
            EventStore::new(StoreConfig::with_max_records(2), AudienceFilter::new("u1"));
        store.ingest(record("old", 1));
        store.ingest(record("mid", 2));
        store.ingest(record("new", 3));
        assert!(!store.contains("old"));
        assert_eq!(store.ingest(record("old", 1)), IngestOutcome::Duplicate);
        assert_eq!(store.unread_count(), 3);
    }

    #[test]
    fn test_first_merge_replaces_and_trusts_server_count() {
        let mut store = store();
        store.ingest(record("local", 50));
        let summary = store.merge(RefreshBatch {
            records: vec![record("a", 10), record("b", 20)],
            unread_count: 7,
        });
        assert!(summary.first_load);
        assert_eq!(summary.added, 2);
        assert!(!store.contains("local"));
        assert_eq!(store.unread_count(), 7);
        assert_eq!(store.records()[0].id, "b");
    }

    #[test]
    fn test_later_merge_upserts_and_keeps_unreturned() {
        let mut store = store();
        store.merge(RefreshBatch {
            records: vec![record("a", 10)],
            unread_count: 1,
        });
        store.ingest(record("pushed", 30));
        let updated = record("a", 10).with_priority(Priority::Urgent);
        let summary = store.merge(RefreshBatch {
            records: vec![updated, record("b", 20)],
            unread_count: 3,
        });
        assert!(!summary.first_load);
        assert_eq!((summary.added, summary.updated), (1, 1));
        assert!(store.contains("pushed"));
        assert_eq!(store.get("a").map(|r| r.priority), Some(Priority::Urgent));
        assert_eq!(store.unread_count(), 3);
        assert!(is_sorted(store.records()));
    }

    #[test]
    fn test_stale_merge_cannot_unread_a_local_read() {
        let mut store = store();
        store.merge(RefreshBatch {
            records: vec![record("a", 10), record("b", 11)],
            unread_count: 2,
        });
        store.mark_read(&["a".to_string()], Timestamp(100));
        assert_eq!(store.unread_count(), 1);

        store.merge(RefreshBatch {
            records: vec![record("a", 10), record("b", 11)],
            unread_count: 2,
        });
        let a = store.get("a").unwrap();
        assert!(a.is_read);
        assert_eq!(a.read_at, Some(Timestamp(100)));
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_mark_read_recounts_locally() {
        let mut store = store();
        store.merge(RefreshBatch {
            records: vec![record("a", 1), record("b", 2), record("c", 3)],
            unread_count: 40,
        });
        let changed = store.mark_read(&["a".to_string(), "zzz".to_string()], Timestamp(9));
        assert_eq!(changed, 1);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_mark_all_read_zeroes_count() {
        let mut store = store();
        store.ingest(record("a", 1));
        store.ingest(record("b", 2));
        assert_eq!(store.mark_all_read(Timestamp(5)), 2);
        assert_eq!(store.unread_count(), 0);
        assert!(store.records().iter().all(|r| r.is_read));
    }

    #[test]
    fn test_peer_update_replaces_but_keeps_reads() {
        let mut store = store();
        store.ingest(record("a", 1));
        store.mark_read(&["a".to_string()], Timestamp(3));
        store.apply_peer_update(vec![record("a", 1), record("b", 2)], 2);
        assert!(store.is_loaded());
        assert!(store.get("a").unwrap().is_read);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_seed_does_not_count_as_load() {
        let mut store = store();
        let seeded = store.seed(StoreSnapshot {
            records: vec![record("cached", 1)],
            unread_count: 1,
        });
        assert_eq!(seeded, 1);
        assert!(!store.is_loaded());
        let summary = store.merge(RefreshBatch::default());
        assert!(summary.first_load);
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_ids_within_batch_collapse() {
        let mut store = store();
        store.merge(RefreshBatch {
            records: vec![record("a", 1), record("a", 1)],
            unread_count: 1,
        });
        assert_eq!(store.len(), 1);
    }
}
