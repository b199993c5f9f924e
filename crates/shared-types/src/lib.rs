//! # Shared Types Crate
//!
//! Data model and message types shared by every Herald crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: records, leader slot, connection state and
//!   the peer message union are defined once, here.
//! - **Closed Message Set**: the peer bus carries exactly the six kinds of
//!   `MessageBody`; anything else is rejected at decode time.
//! - **Origin Tagging**: every `PeerMessage` carries `from_peer_id` so a
//!   peer can drop its own frames.
//! - **Host-Owned Timers**: state machines emit `TimerCommand`s and accept
//!   `TimerToken`s; stale tokens are ignored by `TimerRegistry`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod millis;
pub mod time;
pub mod timer;

pub use entities::*;
pub use envelope::{MessageBody, MessageKind, PeerMessage, PROTOCOL_VERSION};
pub use errors::*;
pub use time::{SystemTimeSource, TimeSource};
pub use timer::{TimerCommand, TimerRegistry, TimerToken};
