//! # Delivery Metrics
//!
//! Prometheus metrics for peer coordination and upstream delivery.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! hr-04-delivery = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `herald_records_ingested_total` - Counter of ingest attempts (by outcome)
//! - `herald_bus_messages_sent_total` - Counter of frames published (by kind)
//! - `herald_bus_messages_received_total` - Counter of foreign frames handled (by kind)
//! - `herald_bus_messages_rejected` - Gauge of frames the bus decoder rejected so far
//! - `herald_elections_won_total` - Counter of leadership acquisitions
//! - `herald_polls_total` - Counter of polling requests issued
//! - `herald_push_failures_total` - Counter of push channel failures reported by the host
//! - `herald_connection_transitions_total` - Counter of connection state entries (by state)
//! - `herald_connection_state` - Gauge (0=Disconnected, 1=Connecting, 2=Connected, 3=Reconnecting, 4=PollingFallback)
//! - `herald_is_leader` - Gauge (0=follower, 1=leader)

use hr_01_event_store::IngestOutcome;
use shared_types::{ConnectionState, MessageKind};

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Ingest attempts, labeled by outcome
    pub static ref RECORDS_INGESTED: IntCounterVec = register_int_counter_vec!(
        "herald_records_ingested_total",
        "Total number of records offered to the event store",
        &["outcome"]
    )
    .expect("Failed to create RECORDS_INGESTED metric");

    /// Frames published, labeled by kind
    pub static ref BUS_SENT: IntCounterVec = register_int_counter_vec!(
        "herald_bus_messages_sent_total",
        "Total number of peer bus frames published",
        &["kind"]
    )
    .expect("Failed to create BUS_SENT metric");

    /// Foreign frames handled, labeled by kind
    pub static ref BUS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        "herald_bus_messages_received_total",
        "Total number of peer bus frames received from other peers",
        &["kind"]
    )
    .expect("Failed to create BUS_RECEIVED metric");

    /// Frames dropped at decode time, as counted by the bus
    pub static ref BUS_REJECTED: IntGauge = register_int_gauge!(
        "herald_bus_messages_rejected",
        "Number of peer bus frames rejected by the decoder"
    )
    .expect("Failed to create BUS_REJECTED metric");

    pub static ref ELECTIONS_WON: IntCounter = register_int_counter!(
        "herald_elections_won_total",
        "Total number of times this process gained leadership"
    )
    .expect("Failed to create ELECTIONS_WON metric");

    pub static ref PUSH_FAILURES: IntCounter = register_int_counter!(
        "herald_push_failures_total",
        "Total number of push channel failures"
    )
    .expect("Failed to create PUSH_FAILURES metric");

    pub static ref POLLS: IntCounter = register_int_counter!(
        "herald_polls_total",
        "Total number of polling requests issued"
    )
    .expect("Failed to create POLLS metric");

    /// Connection state entries, labeled by state
    pub static ref CONNECTION_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "herald_connection_transitions_total",
        "Total number of connection state transitions",
        &["state"]
    )
    .expect("Failed to create CONNECTION_TRANSITIONS metric");

    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        "herald_connection_state",
        "Connection state (0=Disconnected 1=Connecting 2=Connected 3=Reconnecting 4=Polling)"
    )
    .expect("Failed to create CONNECTION_STATE metric");

    pub static ref IS_LEADER: IntGauge = register_int_gauge!(
        "herald_is_leader",
        "Whether a peer in this process is leader (0=no, 1=yes)"
    )
    .expect("Failed to create IS_LEADER metric");
}

#[cfg(any(feature = "metrics", test))]
fn outcome_label(outcome: IngestOutcome) -> &'static str {
    match outcome {
        IngestOutcome::Inserted => "inserted",
        IngestOutcome::Duplicate => "duplicate",
        IngestOutcome::Filtered => "filtered",
    }
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

#[cfg(feature = "metrics")]
pub fn record_ingest(outcome: IngestOutcome) {
    RECORDS_INGESTED.with_label_values(&[outcome_label(outcome)]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_bus_sent(kind: MessageKind) {
    BUS_SENT.with_label_values(&[kind.as_str()]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_bus_received(kind: MessageKind) {
    BUS_RECEIVED.with_label_values(&[kind.as_str()]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_bus_rejected(total: u64) {
    BUS_REJECTED.set(i64::try_from(total).unwrap_or(i64::MAX));
}

#[cfg(feature = "metrics")]
pub fn record_election_won() {
    ELECTIONS_WON.inc();
}

#[cfg(feature = "metrics")]
pub fn record_push_failure() {
    PUSH_FAILURES.inc();
}

#[cfg(feature = "metrics")]
pub fn record_poll() {
    POLLS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_connection_state(state: ConnectionState) {
    CONNECTION_TRANSITIONS.with_label_values(&[state.as_str()]).inc();
    CONNECTION_STATE.set(state.as_gauge());
}

#[cfg(feature = "metrics")]
pub fn set_leader(is_leader: bool) {
    IS_LEADER.set(i64::from(is_leader));
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature is disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_ingest(_outcome: IngestOutcome) {}

#[cfg(not(feature = "metrics"))]
pub fn record_bus_sent(_kind: MessageKind) {}

#[cfg(not(feature = "metrics"))]
pub fn record_bus_received(_kind: MessageKind) {}

#[cfg(not(feature = "metrics"))]
pub fn set_bus_rejected(_total: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_election_won() {}

#[cfg(not(feature = "metrics"))]
pub fn record_push_failure() {}

#[cfg(not(feature = "metrics"))]
pub fn record_poll() {}

#[cfg(not(feature = "metrics"))]
pub fn record_connection_state(_state: ConnectionState) {}

#[cfg(not(feature = "metrics"))]
pub fn set_leader(_is_leader: bool) {}
