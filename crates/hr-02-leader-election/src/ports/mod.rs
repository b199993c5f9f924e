//! Ports (traits the host implements).

pub mod outbound;

pub use outbound::{
    clear_leader_if_held, read_json, read_leader, write_json, write_leader, SharedRecordStore,
    LEADER_KEY, NOTICES_KEY, STATE_KEY,
};
