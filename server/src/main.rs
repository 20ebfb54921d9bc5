//! Depot Server Binary
//!
//! Serves both container ledgers over HTTP on top of PostgreSQL.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use depot_ledger::store::{load_catalog, PgBalanceStore, PgWarehouseStore};
use depot_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting depot server");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!(error = %e, "Database connection failed");
            e
        })?;

    if config.database.run_migrations {
        depot_ledger::MIGRATOR.run(&pool).await?;
        info!("Migrations applied");
    }

    let catalog = Arc::new(load_catalog(&pool).await.map_err(|e| {
        error!(error = %e, "Container catalog could not be bound");
        e
    })?);

    let state = AppState::new(
        Arc::new(PgBalanceStore::new(pool.clone(), Arc::clone(&catalog))),
        Arc::new(PgWarehouseStore::new(pool.clone(), catalog)),
        config.ledger.clone(),
    );

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(
        listen_addr = %config.listen_addr,
        listen_port = %config.listen_port,
        "Depot server running"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("Depot server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
