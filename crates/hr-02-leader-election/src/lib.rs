//! # Leader Election (hr-02)
//!
//! Decides, per peer, whether that peer holds the single upstream
//! connection for the origin.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌─────────────────────────┐
//! │      LeaderElector       │─────▶│   SharedRecordStore     │
//! │  (pure state machine)    │ r/w  │  herald.leader slot     │
//! └──────────────────────────┘      └─────────────────────────┘
//!          │  ElectionAction                  ▲
//!          ▼                                  │ adapters:
//!   host publishes on the peer bus,           │ InMemoryRecordStore
//!   arms/cancels timers                       │ FileRecordStore (fs2)
//! ```
//!
//! ## Guarantees
//!
//! - Only a visible peer claims leadership.
//! - A heartbeat from another peer demotes unconditionally.
//! - `heartbeat_interval < leader_timeout / 2`, so a live leader refreshes
//!   its record at least twice per staleness window.
//! - Two self-believed leaders converge to one within one leader-check
//!   period (`leader_timeout / 2`): both demote on each other's heartbeat
//!   and the last writer of the record resumes at its next check.
//!
//! This is best-effort, not consensus. A brief double leader costs a
//! duplicate upstream connection; store dedup absorbs duplicate records.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;

pub use adapters::{FileRecordStore, InMemoryRecordStore};
pub use config::ElectionConfig;
pub use domain::{ElectionAction, ElectionTimer, LeaderElector};
pub use ports::{SharedRecordStore, LEADER_KEY, NOTICES_KEY, STATE_KEY};
