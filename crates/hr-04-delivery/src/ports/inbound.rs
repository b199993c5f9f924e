//! Driving Ports (API - Inbound)
//!
//! What the surrounding application may ask of a running peer.

use crate::error::DeliveryResult;
use crate::events::{PeerEvent, PeerSnapshot};
use tokio::sync::broadcast;

pub trait DeliveryApi: Send + Sync {
    /// Current read-only view.
    fn snapshot(&self) -> PeerSnapshot;

    /// Subscribe to application-facing events.
    fn events(&self) -> broadcast::Receiver<PeerEvent>;

    /// Mark the given records read locally, upstream, and on every peer.
    fn request_mark_read(&self, ids: Vec<String>) -> DeliveryResult<()>;

    fn request_mark_all_read(&self) -> DeliveryResult<()>;

    /// Full refresh from upstream. Coalesces with one already in flight.
    fn request_refresh(&self) -> DeliveryResult<()>;
}
