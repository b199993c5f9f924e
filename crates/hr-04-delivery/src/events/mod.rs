//! Events flowing into and out of the peer coordinator.

pub mod incoming;
pub mod outgoing;

pub use incoming::{PeerCommand, PeerInput, PeerTimer};
pub use outgoing::{PeerEffect, PeerEvent, PeerSnapshot};
