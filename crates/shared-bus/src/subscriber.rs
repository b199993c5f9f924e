//! # Bus Subscriber
//!
//! Receiving side of the peer bus: decodes frames, rejects bad ones loudly,
//! and applies the subscription's filter.

use crate::filter::MessageFilter;
use shared_types::PeerMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One encoded frame as carried by the broadcast channel.
pub type Frame = Arc<[u8]>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The bus was dropped.
    #[error("Peer bus closed")]
    Closed,
}

/// A subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<Frame>,
    filter: MessageFilter,
    frames_rejected: Arc<AtomicU64>,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<Frame>,
        filter: MessageFilter,
        frames_rejected: Arc<AtomicU64>,
    ) -> Self {
        Self {
            receiver,
            filter,
            frames_rejected,
        }
    }

    /// Receive the next frame that decodes and passes the filter.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<PeerMessage> {
        loop {
            let frame = match self.receiver.recv().await {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, frames dropped");
                    continue;
                }
            };
            if let Some(message) = self.accept(&frame) {
                return Some(message);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Option<PeerMessage>, SubscriptionError> {
        loop {
            let frame = match self.receiver.try_recv() {
                Ok(frame) => frame,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };
            if let Some(message) = self.accept(&frame) {
                return Ok(Some(message));
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    fn accept(&self, frame: &[u8]) -> Option<PeerMessage> {
        match PeerMessage::decode(frame) {
            Ok(message) if self.filter.matches(&message) => Some(message),
            Ok(_) => None,
            Err(error) => {
                self.frames_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(%error, bytes = frame.len(), "Rejected peer bus frame");
                None
            }
        }
    }
}
