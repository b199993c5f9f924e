//! Driven Ports (SPI - Outbound)
//!
//! The upstream notification service. Only the leader opens the push
//! channel or polls; any peer may refresh, mark read, or load preferences.

use async_trait::async_trait;
use hr_03_connection::PushEvent;
use shared_types::{NotificationRecord, RefreshBatch, Timestamp, UpstreamError};
use std::pin::Pin;
use tokio_stream::Stream;

/// Server-initiated stream of push events. The stream ending is a channel
/// failure.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushEvent, UpstreamError>> + Send>>;

#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Full fetch of the user's newest records plus the authoritative
    /// unread count.
    async fn fetch_notifications(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RefreshBatch, UpstreamError>;

    /// Records created after `since`. May be empty.
    async fn poll(
        &self,
        user_id: &str,
        since: Timestamp,
    ) -> Result<Vec<NotificationRecord>, UpstreamError>;

    async fn mark_read(&self, ids: &[String]) -> Result<(), UpstreamError>;

    async fn mark_all_read(&self, user_id: &str) -> Result<(), UpstreamError>;

    /// `true` when at least one delivery preference is enabled.
    async fn delivery_enabled(&self, user_id: &str) -> Result<bool, UpstreamError>;

    /// Open the push channel. Resolves once the handshake completes.
    async fn open_push_channel(&self, user_id: &str) -> Result<PushStream, UpstreamError>;
}
