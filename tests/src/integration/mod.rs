//! Multi-peer scenarios.

pub mod runtime;
pub mod scenarios;
