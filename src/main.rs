//! Satellite tracking core.
//!
//! Ingests two-line-element data from files or the public catalog
//! service, persists it, and keeps a filterable table plus 3D globe and
//! 2D map marker state consistent with SGP4-computed positions,
//! predictions, and observer visibility.

mod chart;
mod config;
mod download;
mod ephemeris;
mod error;
mod jobs;
mod orchestrator;
mod propagator;
mod registry;
mod store;
mod table;
mod tle;


use chrono::Utc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    // Initialize tracing with JSON output for production
    if config.json_logs {
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
            .with(fmt::layer())
            .init();
    }

    info!("Starting sattrack v{}", env!("CARGO_PKG_VERSION"));
    info!("Satellite store: {}", config.database_path);

    let store = Store::open(&config.database_path)?;
    let mut orchestrator = Orchestrator::new(store, config.clone(), Utc::now())?;
    info!("{} satellites loaded", orchestrator.registry().len());

    if let Some(observer) = config.default_observer {
        orchestrator.apply_visibility_filter(
            observer.latitude_deg,
            observer.longitude_deg,
            Utc::now(),
        );
        info!(
            "visibility filter active for observer at {:.4}, {:.4}",
            observer.latitude_deg, observer.longitude_deg
        );
    }

    let mut outcomes = orchestrator
        .take_outcome_receiver()
        .expect("outcome receiver is taken once at startup");

    // Periodic refresh keeps the table and marker layers tracking the
    // satellites' live positions between user actions.
    let mut refresh = tokio::time::interval(std::time::Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = refresh.tick() => {
                orchestrator.refresh_views(Utc::now());
            }
            Some(outcome) = outcomes.recv() => {
                match orchestrator.handle_job_outcome(outcome, Utc::now()) {
                    Ok(status) => info!("{}", status),
                    Err(e) => error!("refresh after job completion failed: {}", e),
                }
            }
        }
    }

    Ok(())
}
