//! cargotrack-server: the tracking backbone as a single process.
//!
//! Loads configuration, wires storage, pipeline, hub, scheduler, and
//! dispatcher, then runs until interrupted.
//!
//! ## Configuration
//! Set via `config.yaml`, a file named by `CARGOTRACK_CONFIG`, or
//! `CARGOTRACK`-prefixed environment variables:
//! - `CARGOTRACK__DATABASE__URL`: sqlite URL (default `sqlite:cargotrack.db`)
//! - `CARGOTRACK__FEED__ENABLED` / `__BASE_URL` / `__API_KEY`
//! - `CARGOTRACK__SCHEDULER__INTERVAL_MINUTES` / `__BATCH_SIZE`
//! - `CARGOTRACK_LOG`: tracing filter (default `info`)
//!
//! ## Usage
//! ```bash
//! # With defaults
//! cargotrack-server
//!
//! # With a config file
//! cargotrack-server /etc/cargotrack/config.yaml
//! ```

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cargotrack::app::App;
use cargotrack::config::{Config, LOG_ENV_VAR};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("failed to load configuration: {}", e);
        Box::<dyn std::error::Error + Send + Sync>::from(e.to_string())
    })?;

    info!("starting cargotrack-server");

    let mut app = App::build(config).await?;
    app.start();

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    app.shutdown().await;
    Ok(())
}
