//! # Connection Manager (hr-03)
//!
//! Owned only by the elected leader. Prefers the upstream push channel,
//! retries it with capped exponential backoff, and after a bounded number
//! of failures falls back to periodic polling.
//!
//! ## Rules
//!
//! - Handshake deadline: `connection_timeout`, armed on entering
//!   `Connecting` and cleared on `Connected`.
//! - Retry delay: `min(base × 2^attempt, cap)`.
//! - `failure_count >= max_push_failures` or
//!   `retry_attempt >= max_reconnect_attempts` → `PollingFallback`.
//! - Polling never switches back to push on its own; only a fresh
//!   activation or [`ConnectionManager::retry_push`] does.
//! - Leaving any state cancels that state's timers. Every timer token is
//!   generation-checked, so a late fire after teardown is inert.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;

pub use config::ConnectionConfig;
pub use domain::{Backoff, ConnectionAction, ConnectionManager, ConnectionTimer, PushEvent};
