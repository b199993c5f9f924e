//! # Time Source
//!
//! Wall-clock abstraction so hosts (and tests) decide what "now" means.

use crate::entities::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current wall-clock time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Timestamp(millis)
    }
}
