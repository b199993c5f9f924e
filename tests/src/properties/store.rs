//! # Event Store Properties
//!
//! - Repeating an id never adds a second record or a second unread.
//! - Records read `created_at` descending, then priority rank descending.
//! - A local read survives stale copies arriving later.
//! - The size bound evicts the oldest record.

#[cfg(test)]
mod tests {
    use hr_01_event_store::{AudienceFilter, EventStore, IngestOutcome, StoreConfig};
    use proptest::prelude::*;
    use shared_types::{NotificationRecord, Priority, RefreshBatch, Timestamp};
    use std::collections::HashSet;

    const USER: &str = "u1";

    fn store() -> EventStore {
        EventStore::new(StoreConfig::default(), AudienceFilter::new(USER))
    }

    fn record(id: &str, at: u64) -> NotificationRecord {
        NotificationRecord::new(id, Timestamp(at), USER)
    }

    fn priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Low),
            Just(Priority::Medium),
            Just(Priority::High),
            Just(Priority::Urgent),
        ]
    }

    proptest! {
        #[test]
        fn prop_repeated_ids_are_stored_once(ids in prop::collection::vec(0u8..12, 1..60)) {
            let mut store = store();
            let mut distinct = HashSet::new();
            for (i, id) in ids.iter().enumerate() {
                let outcome = store.ingest(record(&format!("n{id}"), 1_000 + i as u64));
                prop_assert_eq!(outcome == IngestOutcome::Inserted, distinct.insert(*id));
            }
            prop_assert_eq!(store.len(), distinct.len());
            prop_assert_eq!(store.unread_count(), distinct.len() as u64);
        }

        #[test]
        fn prop_display_order(entries in prop::collection::vec((0u64..20, priority()), 1..80)) {
            let mut store = store();
            for (i, (at, priority)) in entries.iter().enumerate() {
                store.ingest(record(&format!("n{i}"), *at).with_priority(*priority));
            }
            for pair in store.records().windows(2) {
                let (newer, older) = (&pair[0], &pair[1]);
                prop_assert!(newer.created_at >= older.created_at);
                if newer.created_at == older.created_at {
                    prop_assert!(newer.priority.rank() >= older.priority.rank());
                }
            }
        }

        #[test]
        fn prop_peer_update_never_duplicates(ids in prop::collection::vec(0u8..8, 0..30)) {
            let mut store = store();
            let records: Vec<_> = ids
                .iter()
                .map(|id| record(&format!("n{id}"), u64::from(*id)))
                .collect();
            store.apply_peer_update(records, 0);
            let distinct: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(store.len(), distinct.len());
        }
    }

    #[test]
    fn test_read_mark_survives_stale_copies() {
        let mut store = store();
        store.ingest(record("n1", 10));
        store.mark_read(&["n1".to_string()], Timestamp(20));

        assert_eq!(store.ingest(record("n1", 10)), IngestOutcome::Duplicate);
        assert!(store.get("n1").unwrap().is_read);

        store.merge(RefreshBatch {
            records: vec![record("n1", 10)],
            unread_count: 1,
        });
        assert!(store.get("n1").unwrap().is_read);
        assert_eq!(store.unread_count(), 0);

        store.apply_peer_update(vec![record("n1", 10)], 1);
        assert!(store.get("n1").unwrap().is_read);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_size_bound_evicts_oldest() {
        let mut store = store();
        for i in 0..101u64 {
            store.ingest(record(&format!("n{i}"), 1_000 + i));
        }
        assert_eq!(store.len(), 100);
        assert!(!store.contains("n0"));
        assert!(store.contains("n100"));
        assert_eq!(store.records().last().unwrap().id, "n1");
        assert_eq!(store.records()[0].id, "n100");
    }

    #[test]
    fn test_evicted_id_not_reinserted() {
        let mut store = store();
        for i in 0..101u64 {
            store.ingest(record(&format!("n{i}"), 1_000 + i));
        }
        assert_eq!(store.ingest(record("n0", 1_000)), IngestOutcome::Duplicate);
        assert!(!store.contains("n0"));
    }
}
