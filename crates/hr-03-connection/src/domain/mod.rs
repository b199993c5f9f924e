//! Domain module for the Connection Manager
//!
//! - backoff: capped exponential reconnect delay
//! - push: events carried by the push channel
//! - manager: the leader-only connection state machine

pub mod backoff;
pub mod manager;
pub mod push;

pub use backoff::Backoff;
pub use manager::{ConnectionAction, ConnectionManager, ConnectionTimer};
pub use push::PushEvent;
