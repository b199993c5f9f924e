//! # Herald Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── properties/      # Invariants over one component or the simulation
//! │   ├── store.rs       dedup, ordering, read marks, size bound
//! │   ├── election.rs    single-leader convergence, handoff
//! │   └── connection.rs  backoff bound, polling fallback
//! │
//! └── integration/     # Multi-peer scenarios
//!     ├── scenarios.rs   simulated origin, virtual clock
//!     └── runtime.rs     tokio runtime, in-memory bus
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p hr-tests
//! cargo test -p hr-tests properties::
//! cargo test -p hr-tests integration::
//! ```

pub mod integration;
pub mod properties;
