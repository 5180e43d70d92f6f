//! Satellite feed server binary
//!
//! Run with: cargo run -p sat-tracker --bin sat-tracker-server

use sat_tracker::{config::TrackerConfig, server::TrackerServer, ShutdownOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sat_tracker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TrackerConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Element sets: {}", config.data.tle_dir.display());
    tracing::info!("  - Satellite marker: {}", config.data.satellite_marker.display());
    tracing::info!("  - Facility marker: {}", config.data.facility_marker.display());
    tracing::info!("  - Observer file: {}", config.data.observer_file.display());
    tracing::info!("  - Viewport expansion: {}", config.filter.viewport_expansion_factor);

    let server = TrackerServer::new(config).await?;
    tracing::info!("Health: http://{}/health", server.address());

    match server.start().await? {
        ShutdownOutcome::Graceful => Ok(()),
        ShutdownOutcome::Forced(aborted) => {
            tracing::error!("Forced shutdown, {} sessions aborted", aborted);
            std::process::exit(1);
        }
    }
}
