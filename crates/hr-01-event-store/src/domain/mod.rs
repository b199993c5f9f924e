//! Domain module for the Event Store
//!
//! - audience: which records may enter the store
//! - ordering: display order (newest first, then priority)
//! - recent: bounded id windows for dedup and read marks
//! - store: the store itself

pub mod audience;
pub mod ordering;
pub mod recent;
pub mod store;

pub use audience::AudienceFilter;
pub use ordering::{display_order, is_sorted, sort_records};
pub use recent::RecentIds;
pub use store::{EventStore, IngestOutcome, MergeSummary, StoreSnapshot};
