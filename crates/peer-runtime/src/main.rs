use anyhow::Result;
use herald_telemetry::{init_telemetry, TelemetryConfig};
use peer_runtime::{HeraldHost, RuntimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env())?;

    let config = RuntimeConfig::load()?;
    let host = HeraldHost::start(config)?;

    info!("Herald host is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    host.shutdown().await
}
