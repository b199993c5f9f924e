//! Persistence helpers owned by the coordinator.

pub mod cache;
pub mod ledger;

pub use cache::{CacheWrite, SnapshotCache};
pub use ledger::{NoticeEntry, NoticeLedger};
