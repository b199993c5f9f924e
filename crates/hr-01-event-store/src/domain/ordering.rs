//! Display order of the store.
//!
//! `created_at` descending, then priority rank descending. Ties beyond that
//! break on `id` so every peer derives the same sequence from the same set.

use shared_types::NotificationRecord;
use std::cmp::Ordering;

pub fn display_order(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_records(records: &mut [NotificationRecord]) {
    records.sort_by(display_order);
}

pub fn is_sorted(records: &[NotificationRecord]) -> bool {
    records
        .windows(2)
        .all(|pair| display_order(&pair[0], &pair[1]) != Ordering::Greater)
}
