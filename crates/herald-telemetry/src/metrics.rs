//! Prometheus text export.
//!
//! Metric families are registered by the crates that own them (see
//! `hr_04_delivery::metrics`) into the default registry. This module only
//! renders that registry.

use prometheus::{Encoder, TextEncoder};

use crate::TelemetryError;

/// Render every family in the default registry in the text format.
pub fn export_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsExport(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsExport(e.to_string()))
}

/// Content type to serve [`export_text`] output with.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
