//! Depot Simulator
//!
//! Drives vendor routes against in-memory container ledgers and checks the
//! ledger's properties afterwards.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use depot_ledger::LedgerConfig;

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// Depot Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Route simulator for the container deposit ledgers")]
struct Args {
    /// Number of simulated clients
    #[arg(short, long, default_value = "20")]
    clients: usize,

    /// Number of simulated vendors
    #[arg(short, long, default_value = "3")]
    vendors: usize,

    /// Scenario to run instead of a random route day
    #[arg(short, long)]
    scenario: Option<String>,

    /// Client stops across all vendors in a route day
    #[arg(short, long, default_value = "200")]
    rounds: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Time each party lock is held, to widen contention windows
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting depot simulator");
    info!("Clients: {}, vendors: {}", args.clients, args.vendors);

    let controller = SimulationController::new(args.clients, args.vendors, args.seed, LedgerConfig::from_env());
    controller.initialize(Duration::from_millis(args.latency_ms));

    if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        controller.run_route_day(args.rounds).await?;
    }

    let report = controller.verify().await?;

    // Print metrics
    let metrics = controller.metrics().await;
    let (clients, warehouse) = controller.ledger_counters();
    info!("Simulation complete");
    info!("Movements: {}", metrics.total_movements);
    info!(
        "Accepted: {}, rejected: {}, failed: {} ({:.1}% accepted)",
        metrics.accepted_movements,
        metrics.rejected_movements,
        metrics.failed_movements,
        metrics.acceptance_rate() * 100.0
    );
    info!(
        "Containers loaned: {}, collected: {}, overflow to credit: {}",
        metrics.loaned_units, metrics.collected_units, metrics.overflow_units
    );
    info!("Receipts issued: {}", metrics.receipts_issued);
    info!(
        "Latency p50/p99: {}/{} ms",
        metrics.latency_ms(50),
        metrics.latency_ms(99)
    );
    info!(
        "Transaction retries: {} client, {} warehouse",
        clients.tx_retries, warehouse.tx_retries
    );
    info!(
        "Replayed {} movements across {} parties",
        report.movements_replayed, report.parties_checked
    );

    Ok(())
}
