//! # Delivery Coordinator (hr-04)
//!
//! One [`Peer`] per tab-like context. The peer owns an event store, a
//! leader elector and a connection manager, and wires them to the peer
//! bus and the upstream notification service.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   PeerInput ──▶ │                    Peer                       │ ──▶ PeerEffect
//!  (bus, timers,  │                                              │   (publish, timers,
//!   visibility,   │  ┌────────────┐ ┌────────────┐ ┌──────────┐  │    open/close push,
//!   upstream      │  │ hr-02      │ │ hr-03      │ │ hr-01    │  │    poll, refresh,
//!   completions)  │  │ elector    │ │ connection │ │ store    │  │    notify)
//!                 │  └────────────┘ └────────────┘ └──────────┘  │
//!                 │        ledger (herald.notices)               │
//!                 │        cache  (herald.state)                 │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! [`Peer`] is synchronous and clock-free: every call takes `now` and
//! returns effects. [`PeerRuntime`] drives it on tokio against real
//! adapters; [`testing::Simulation`] drives several of them on a virtual
//! clock.
//!
//! ## Guarantees
//!
//! - Only the leader holds an upstream channel. A peer that loses
//!   leadership tears its channel down in the same step.
//! - A record is surfaced at most once per origin, across all peers.
//! - Followers learn about new records from the bus, never from upstream.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod runtime;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ConfigError, PeerConfig};
pub use error::{DeliveryError, DeliveryResult};
pub use events::{PeerCommand, PeerEffect, PeerEvent, PeerInput, PeerSnapshot, PeerTimer};
pub use ports::{DeliveryApi, PushStream, UpstreamApi};
pub use runtime::{PeerHandle, PeerRuntime, RuntimeContext, TokioTimeSource};
pub use service::Peer;
