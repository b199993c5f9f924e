//! In-process upstream notification service.
//!
//! Holds a server-side record list and hands out push channels backed by
//! unbounded mpsc queues. The demonstration binary and the runtime tests use
//! it to inject records, drop channels, and refuse connections on demand.

use crate::ports::{PushStream, UpstreamApi};
use async_trait::async_trait;
use hr_03_connection::PushEvent;
use parking_lot::Mutex;
use shared_types::{NotificationRecord, RefreshBatch, Timestamp, UpstreamError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

type PushSender = mpsc::UnboundedSender<Result<PushEvent, UpstreamError>>;

/// How `open_push_channel` behaves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PushMode {
    #[default]
    Accept,
    /// Refuse with the given error.
    Refuse(UpstreamError),
    /// Never complete the handshake.
    Hang,
}

#[derive(Default)]
struct ServerState {
    records: Vec<NotificationRecord>,
    delivery_enabled: bool,
    push_mode: PushMode,
    fetch_failure: Option<UpstreamError>,
    channels: Vec<PushSender>,
    push_opens: u64,
    polls: u64,
    fetches: u64,
    mark_read_calls: Vec<Vec<String>>,
}

#[derive(Clone)]
pub struct ScriptedUpstream {
    state: Arc<Mutex<ServerState>>,
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                delivery_enabled: true,
                ..ServerState::default()
            })),
        }
    }

    pub fn with_records(records: Vec<NotificationRecord>) -> Self {
        let upstream = Self::new();
        upstream.state.lock().records = records;
        upstream
    }

    pub fn set_delivery_enabled(&self, enabled: bool) {
        self.state.lock().delivery_enabled = enabled;
    }

    pub fn set_push_mode(&self, mode: PushMode) {
        self.state.lock().push_mode = mode;
    }

    /// Fail every full fetch with `error` until cleared with `None`.
    pub fn set_fetch_failure(&self, error: Option<UpstreamError>) {
        self.state.lock().fetch_failure = error;
    }

    /// Store `record` server-side and push it down every open channel.
    pub fn emit(&self, record: NotificationRecord) {
        let mut state = self.state.lock();
        state.records.push(record.clone());
        broadcast(&mut state.channels, PushEvent::Record(record));
    }

    /// Push a non-record event down every open channel.
    pub fn send_event(&self, event: PushEvent) {
        broadcast(&mut self.state.lock().channels, event);
    }

    /// Close every open channel from the server side.
    pub fn drop_channels(&self) {
        let dropped = std::mem::take(&mut self.state.lock().channels);
        debug!(count = dropped.len(), "Dropping push channels");
    }

    /// Channels whose client end is still attached.
    pub fn open_channels(&self) -> usize {
        let mut state = self.state.lock();
        state.channels.retain(|tx| !tx.is_closed());
        state.channels.len()
    }

    pub fn push_opens(&self) -> u64 {
        self.state.lock().push_opens
    }

    pub fn polls(&self) -> u64 {
        self.state.lock().polls
    }

    pub fn fetches(&self) -> u64 {
        self.state.lock().fetches
    }

    pub fn mark_read_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().mark_read_calls.clone()
    }

    fn owned_by<'a>(
        records: &'a [NotificationRecord],
        user_id: &'a str,
    ) -> impl Iterator<Item = &'a NotificationRecord> + 'a {
        records
            .iter()
            .filter(move |r| r.owner_user_id.as_deref() == Some(user_id))
    }
}

fn broadcast(channels: &mut Vec<PushSender>, event: PushEvent) {
    channels.retain(|tx| tx.send(Ok(event.clone())).is_ok());
}

#[async_trait]
impl UpstreamApi for ScriptedUpstream {
    async fn fetch_notifications(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RefreshBatch, UpstreamError> {
        let mut state = self.state.lock();
        state.fetches += 1;
        if let Some(error) = state.fetch_failure.clone() {
            return Err(error);
        }
        let mut owned: Vec<NotificationRecord> =
            Self::owned_by(&state.records, user_id).cloned().collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let unread_count = owned.iter().filter(|r| !r.is_read).count() as u64;
        Ok(RefreshBatch {
            records: owned.into_iter().skip(offset).take(limit).collect(),
            unread_count,
        })
    }

    async fn poll(
        &self,
        user_id: &str,
        since: Timestamp,
    ) -> Result<Vec<NotificationRecord>, UpstreamError> {
        let mut state = self.state.lock();
        state.polls += 1;
        Ok(Self::owned_by(&state.records, user_id)
            .filter(|r| r.created_at > since)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, ids: &[String]) -> Result<(), UpstreamError> {
        let mut state = self.state.lock();
        state.mark_read_calls.push(ids.to_vec());
        for record in state.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.is_read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<(), UpstreamError> {
        let mut state = self.state.lock();
        for record in state
            .records
            .iter_mut()
            .filter(|r| r.owner_user_id.as_deref() == Some(user_id))
        {
            record.is_read = true;
        }
        Ok(())
    }

    async fn delivery_enabled(&self, _user_id: &str) -> Result<bool, UpstreamError> {
        Ok(self.state.lock().delivery_enabled)
    }

    async fn open_push_channel(&self, user_id: &str) -> Result<PushStream, UpstreamError> {
        let mode = {
            let mut state = self.state.lock();
            state.push_opens += 1;
            state.push_mode.clone()
        };
        match mode {
            PushMode::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                // The receiver is alive, so the hello cannot fail.
                let _ = tx.send(Ok(PushEvent::Connected));
                self.state.lock().channels.push(tx);
                debug!(user_id, "Push channel accepted");
                Ok(Box::pin(UnboundedReceiverStream::new(rx)))
            }
            PushMode::Refuse(error) => Err(error),
            PushMode::Hang => std::future::pending().await,
        }
    }
}
