//! # Herald Telemetry
//!
//! Logging and metrics export for Herald hosts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use herald_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // ...
//!     println!("{}", herald_telemetry::export_text()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HR_LOG_LEVEL` | `info` | Log filter, falls back to `RUST_LOG` |
//! | `HR_JSON_LOGS` | `false` | JSON lines instead of human-readable output |
//! | `HR_SERVICE_NAME` | `herald` | Service name in the startup line |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{content_type, export_text};
pub use tracing_setup::{env_filter, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Failed to export metrics: {0}")]
    MetricsExport(String),
}

/// Install logging for the process. Metrics need no setup: families
/// register themselves on first use.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_tracing(config)
}
