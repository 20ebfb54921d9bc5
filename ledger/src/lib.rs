//! Depot Ledger
//!
//! Container deposit ledgers: the balance transition, movement records,
//! the denormalized (client↔vendor) and aggregated (vendor↔warehouse)
//! balance strategies, FIFO reconstruction and the stores behind them.

pub mod balance;
pub mod config;
pub mod engine;
pub mod fifo;
pub mod metrics;
pub mod movement;
pub mod store;
pub mod strategy;
pub mod transition;

pub use balance::{AggregatedBalance, Balance, MovementTotals};
pub use config::LedgerConfig;
pub use engine::Ledger;
pub use fifo::{ContainerTotals, FifoDetail, OutstandingLoanBatch};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
pub use movement::{quantities_from_wire, BalanceScope, MAX_LINE_QUANTITY, MovementRecord, MovementRequest, Page};
pub use strategy::{Aggregated, AppliedLine, AppliedMovement, BalanceStrategy, Denormalized};
pub use transition::{Position, Transition};

/// Embedded SQL migrations of the ledger tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
