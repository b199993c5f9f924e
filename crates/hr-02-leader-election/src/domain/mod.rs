//! Domain module for Leader Election

pub mod elector;

pub use elector::{ElectionAction, ElectionTimer, LeaderElector};
