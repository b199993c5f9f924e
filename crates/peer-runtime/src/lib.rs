//! # Herald Peer Runtime
//!
//! Demonstration host for the delivery layer. Several peers of one origin
//! run in one process; only the elected leader talks to the (scripted)
//! upstream and the rest learn everything over the peer bus.
//!
//! ## Startup Sequence
//!
//! 1. Initialise telemetry from the environment
//! 2. Load configuration (`HR_CONFIG` file, then `HR_*` overrides)
//! 3. Spawn peers, first one visible
//! 4. Run demo loops until Ctrl+C
//! 5. Shut every peer down so the leader record is released

pub mod config;
pub mod host;

pub use config::RuntimeConfig;
pub use host::HeraldHost;
