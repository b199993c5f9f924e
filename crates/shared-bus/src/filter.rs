//! # Message Filters
//!
//! Decides which decoded frames a subscription hands to its owner. The
//! essential rule is self-origin exclusion: a peer never processes a frame it
//! published itself.

use shared_types::{MessageKind, PeerId, PeerMessage};

/// Filter applied to every decoded frame of a subscription.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Frames from this peer are dropped.
    pub exclude_origin: Option<PeerId>,
    /// When set, only these kinds pass.
    pub kinds: Option<Vec<MessageKind>>,
}

impl MessageFilter {
    /// Accept every frame, including one's own.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept every frame not published by `peer_id`.
    pub fn for_peer(peer_id: PeerId) -> Self {
        Self {
            exclude_origin: Some(peer_id),
            kinds: None,
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<MessageKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn matches(&self, message: &PeerMessage) -> bool {
        if let Some(own) = &self.exclude_origin {
            if message.is_from(own) {
                return false;
            }
        }
        match &self.kinds {
            Some(kinds) => kinds.contains(&message.kind()),
            None => true,
        }
    }
}
