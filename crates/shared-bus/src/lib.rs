//! # Shared Bus - Peer-to-Peer Broadcast
//!
//! The peer bus is an at-most-once multicast channel scoped to one origin:
//! every subscribed peer except the sender receives each frame, peers that
//! are not subscribed lose it, and nothing is persisted.
//!
//! ```text
//! ┌──────────┐   publish()   ┌──────────────┐   recv()   ┌──────────┐
//! │  Peer A  │ ────────────▶ │   Peer Bus   │ ─────────▶ │  Peer B  │
//! └──────────┘               │ (JSON frames)│ ─────────▶ │  Peer C  │
//!                            └──────────────┘            └──────────┘
//!                                   ✗ (own frame filtered) ─▶ Peer A
//! ```
//!
//! ## Guarantees
//!
//! - **Self-Origin Filtering:** subscriptions created with
//!   [`MessageFilter::for_peer`] never yield their owner's frames.
//! - **Strict Decode:** frames with an unknown kind, bad payload, or foreign
//!   protocol version are logged at `warn` and counted, never delivered.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod filter;
pub mod publisher;
pub mod subscriber;

pub use filter::MessageFilter;
pub use publisher::{InMemoryPeerBus, PeerBus};
pub use subscriber::{Frame, Subscription, SubscriptionError};

/// Frames buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
