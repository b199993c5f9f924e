//! # Bus Publisher
//!
//! Defines the publishing side of the peer bus.

use crate::filter::MessageFilter;
use crate::subscriber::{Frame, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use shared_types::{MessageError, PeerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Publishing side of the peer bus.
///
/// Delivery is at-most-once: peers not subscribed at publish time never see
/// the frame, and slow subscribers may lose frames.
pub trait PeerBus: Send + Sync {
    /// Encode and multicast `message`.
    ///
    /// Returns the number of subscribers the frame was handed to (possibly
    /// zero). Fails only if the message cannot be encoded.
    fn publish(&self, message: &PeerMessage) -> Result<usize, MessageError>;

    /// Total frames published.
    fn messages_published(&self) -> u64;
}

/// In-process peer bus over `tokio::sync::broadcast`.
///
/// Frames travel encoded so every subscriber exercises the same strict
/// decode path a cross-process transport would.
pub struct InMemoryPeerBus {
    sender: broadcast::Sender<Frame>,
    messages_published: AtomicU64,
    frames_rejected: Arc<AtomicU64>,
    capacity: usize,
}

impl InMemoryPeerBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            messages_published: AtomicU64::new(0),
            frames_rejected: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    #[must_use]
    pub fn subscribe(&self, filter: MessageFilter) -> Subscription {
        debug!(exclude_origin = ?filter.exclude_origin, "New bus subscription");
        Subscription::new(self.sender.subscribe(), filter, self.frames_rejected.clone())
    }

    /// Multicast an already-encoded frame without validation.
    pub fn publish_raw(&self, frame: impl Into<Frame>) -> usize {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.sender.send(frame.into()).unwrap_or(0)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Frames subscribers failed to decode, across all subscriptions.
    #[must_use]
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryPeerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerBus for InMemoryPeerBus {
    fn publish(&self, message: &PeerMessage) -> Result<usize, MessageError> {
        let frame: Frame = message.encode()?.into();
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        // No receivers is normal for a lone peer: the frame is simply lost.
        let receivers = self.sender.send(frame).unwrap_or(0);
        trace!(
            kind = %message.kind(),
            from = %message.from_peer_id,
            receivers,
            "Peer message published"
        );
        Ok(receivers)
    }

    fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}
