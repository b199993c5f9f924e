//! # Event Store (hr-01)
//!
//! The authoritative in-memory collection of notification records held by
//! one peer.
//!
//! ## Invariants
//!
//! - No two records share an `id`; re-ingesting a known id is a no-op.
//! - Records are ordered `created_at` descending, then priority descending.
//! - At most `max_records` are held; the oldest are evicted first.
//! - Records that fail the audience filter never enter the store.
//! - `is_read` only moves from `false` to `true`.
//!
//! ## Unread Counter
//!
//! `unread_count` is not derived from the held records except on
//! `mark_read`. It comes from the upstream on refresh and moves by one on
//! each genuinely new unread ingest, so capacity truncation cannot make it
//! drift downward.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod domain;

pub use config::{StoreConfig, DEFAULT_MAX_RECORDS};
pub use domain::{AudienceFilter, EventStore, IngestOutcome, MergeSummary, StoreSnapshot};
