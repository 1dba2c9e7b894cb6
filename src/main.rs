//! StoreWatch - store uptime reporting service.
//!
//! Computes uptime/downtime per location from status polls and business
//! hours, as background report jobs exported to CSV.

mod config;
mod db;
mod export;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use scheduler::{JobController, JobSettings};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("storewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StoreWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!("Writing report exports to {}", cfg.export_dir);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start the report worker
    let controller = JobController::start(store, JobSettings::from(&cfg));
    tracing::info!(
        "Report worker ready (roster limit {}, location timeout {:?}, midnight windows {:?})",
        cfg.roster_limit,
        cfg.location_timeout,
        cfg.midnight_windows
    );

    // Start web server
    let server = Server::new(cfg, controller);
    server.start().await?;

    Ok(())
}
