//! # Outbound Ports
//!
//! The shared record store is a synchronous, origin-scoped key-value store
//! visible to every peer. It offers no transactions: a read followed by a
//! write may race with another peer's write, and the last writer wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{LeaderRecord, PeerId, StorageError};
use tracing::warn;

/// Slot holding the current [`LeaderRecord`].
pub const LEADER_KEY: &str = "herald.leader";
/// Cached event store snapshot.
pub const STATE_KEY: &str = "herald.state";
/// Ids already surfaced as new-notification signals.
pub const NOTICES_KEY: &str = "herald.notices";

/// Cross-peer key-value store.
pub trait SharedRecordStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Fails with [`StorageError::QuotaExceeded`] when the value does not fit.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and decode `key`. Undecodable content is logged and read as absent.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn SharedRecordStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            warn!(key, %error, "Corrupt shared record treated as absent");
            Ok(None)
        }
    }
}

pub fn write_json<T: Serialize>(
    store: &dyn SharedRecordStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, &raw)
}

pub fn read_leader(store: &dyn SharedRecordStore) -> Result<Option<LeaderRecord>, StorageError> {
    read_json(store, LEADER_KEY)
}

pub fn write_leader(
    store: &dyn SharedRecordStore,
    record: &LeaderRecord,
) -> Result<(), StorageError> {
    write_json(store, LEADER_KEY, record)
}

/// Delete the leader record iff it still names `peer_id`.
///
/// Returns `true` if the record was removed.
pub fn clear_leader_if_held(
    store: &dyn SharedRecordStore,
    peer_id: &PeerId,
) -> Result<bool, StorageError> {
    match read_leader(store)? {
        Some(record) if record.is_held_by(peer_id) => {
            store.remove(LEADER_KEY)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
