//! Adapters for the delivery layer

pub mod scripted;

pub use scripted::{PushMode, ScriptedUpstream};
