//! Shared handler state.

use std::sync::Arc;

use depot_ledger::store::{BalanceStore, WarehouseStore};
use depot_ledger::{Aggregated, Denormalized, Ledger, LedgerConfig};

/// The two ledgers served by this process.
#[derive(Clone)]
pub struct AppState {
    /// Client↔vendor ledger.
    pub clients: Arc<Ledger<Denormalized>>,
    /// Vendor↔warehouse ledger.
    pub warehouse: Arc<Ledger<Aggregated>>,
}

impl AppState {
    /// Build both ledgers over their stores.
    pub fn new(
        client_store: Arc<dyn BalanceStore>,
        warehouse_store: Arc<dyn WarehouseStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            clients: Arc::new(Ledger::new(Denormalized::new(client_store), config.clone())),
            warehouse: Arc::new(Ledger::new(Aggregated::new(warehouse_store), config)),
        }
    }
}
