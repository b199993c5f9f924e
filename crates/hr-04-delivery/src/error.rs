//! Error types for the delivery layer

use crate::config::ConfigError;
use thiserror::Error;

/// Failures surfaced to callers of a [`crate::PeerHandle`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer has shut down; its mailbox is closed.
    #[error("Peer has stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
