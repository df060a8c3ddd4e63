//! Buzz Ledger & Reward API
//!
//! JSON-over-HTTP server exposing the mileage ledger, coupon engine,
//! settlement workflow, and budget monitor.

mod config;
mod database;
mod error;
mod middleware;
mod notify;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ApiConfig;
use crate::database::{DatabaseConfig, DatabasePool};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Buzz Ledger & Reward API");

    let config = ApiConfig::from_env();
    let addr: SocketAddr = config.listen_addr.parse()?;

    // Postgres when DATABASE_URL is set, in-memory repositories otherwise
    let state = match DatabaseConfig::from_env() {
        Some(database_config) => {
            let pool = DatabasePool::connect(&database_config).await?;
            tracing::info!("Database initialized successfully");
            AppState::postgres(config, pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory storage");
            AppState::in_memory(config)
        }
    };

    let app = routes::router(Arc::new(state));

    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Buzz API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
