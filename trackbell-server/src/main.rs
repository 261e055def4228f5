//! Trackbell Server
//!
//! Polls parcel carriers and notifies every subscriber of a tracking number
//! when new events show up.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::ConfigLoader;
use server::{build_router, run_server};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use trackbell_core::carriers::OcaGateway;
use trackbell_core::framework::DatabaseProcessor;
use trackbell_core::messengers::TelegramMessenger;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Trackbell - parcel tracking notifications
#[derive(Parser, Debug)]
#[command(name = "trackbell-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./trackbell.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting trackbell-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Open the store and bring the schema up to date
    tracing::info!("Connecting to database...");
    let db = DatabaseProcessor::connect(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    db.migrate().await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        e
    })?;
    tracing::info!("Database ready");

    // Wire carrier, messenger and the tracking pipeline
    let gateway = Arc::new(OcaGateway::new(&config.oca, config.scheduler.fetch_timeout));
    let messenger = Arc::new(TelegramMessenger::new(&config.telegram)?);
    let state = AppState::new(db.clone(), gateway, messenger, config.scheduler);

    let restored = state.tracker.rehydrate().await?;
    tracing::info!(
        jobs = restored,
        interval = ?config.scheduler.interval,
        "Tracking jobs restored"
    );

    // Run the server
    let router = build_router(state.clone());
    tracing::info!("Starting HTTP server on {}", config.server.listen);
    let result = run_server(router, config.server.listen).await;

    // Stop polling before the pool goes away
    state.tracker.registry().shutdown().await;

    tracing::info!("Closing database connections...");
    db.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
