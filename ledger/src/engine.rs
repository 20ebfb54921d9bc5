//! Ledger facade over a balance strategy.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use depot_common::{ContainerType, DepotError, PartyId, PerContainer, Result};

use crate::balance::{AggregatedBalance, Balance};
use crate::config::LedgerConfig;
use crate::fifo::{self, FifoDetail};
use crate::metrics::{LedgerMetrics, MetricsSnapshot};
use crate::movement::{BalanceScope, MovementRecord, MovementRequest};
use crate::strategy::{Aggregated, AppliedMovement, BalanceStrategy};

/// Entry point for one ledger: reads, movements with bounded retries, and
/// FIFO reconstruction.
pub struct Ledger<S> {
    strategy: S,
    config: LedgerConfig,
    metrics: Arc<LedgerMetrics>,
}

impl<S: BalanceStrategy> Ledger<S> {
    /// Create a ledger with its own counters.
    pub fn new(strategy: S, config: LedgerConfig) -> Self {
        Self::with_metrics(strategy, config, Arc::new(LedgerMetrics::new()))
    }

    /// Create a ledger reporting into shared counters.
    pub fn with_metrics(strategy: S, config: LedgerConfig, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            strategy,
            config,
            metrics,
        }
    }

    /// Underlying strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Configuration in use.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Check if accepted movements carry a receipt number.
    pub fn issues_receipts(&self) -> bool {
        self.strategy.issues_receipts()
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current balance of a party.
    pub async fn balance(&self, party: PartyId) -> Result<Balance> {
        self.strategy.balance(party).await
    }

    /// Apply a movement request, retrying transient failures.
    #[instrument(skip(self, request), fields(ledger = self.strategy.name(), party = %request.party))]
    pub async fn apply(&self, request: &MovementRequest) -> Result<AppliedMovement> {
        let mut attempt = 0;
        loop {
            match self.strategy.apply(request).await {
                Ok(applied) => {
                    self.metrics
                        .movement_applied(applied.lines.len(), applied.overflow_generated());
                    return Ok(applied);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_tx_retries => {
                    attempt += 1;
                    self.metrics.retry();
                    warn!(attempt, error = %e, "Retrying movement");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => {
                    self.metrics.movement_failed(&e);
                    warn!(error = %e, code = e.error_code(), "Movement rejected");
                    return Err(e);
                }
            }
        }
    }

    /// Movements of a party, newest first.
    pub async fn movements(
        &self,
        party: PartyId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<MovementRecord>> {
        let page = self.config.page(limit, offset)?;
        let rows = self.strategy.movements(party, page).await?;
        if rows.is_empty() && !self.strategy.party_exists(party).await? {
            return Err(DepotError::PartyNotFound(party));
        }
        Ok(rows)
    }

    /// Outstanding loan batches of a party, reconstructed from its history.
    pub async fn fifo_detail(&self, party: PartyId) -> Result<FifoDetail> {
        let history = self.strategy.history(party).await?;
        if history.is_empty() && !self.strategy.party_exists(party).await? {
            return Err(DepotError::PartyNotFound(party));
        }
        debug!(party = %party, movements = history.len(), "Reconstructing FIFO");
        Ok(fifo::reconstruct(party, &history))
    }
}

impl Ledger<Aggregated> {
    /// Aggregated balance of one container type within `scope`.
    pub async fn compute_balance(
        &self,
        party: PartyId,
        container_type: ContainerType,
        scope: BalanceScope,
    ) -> Result<AggregatedBalance> {
        self.strategy.compute_balance(party, container_type, scope).await
    }

    /// Aggregated balance of every container type within `scope`.
    pub async fn compute_all(
        &self,
        party: PartyId,
        scope: BalanceScope,
    ) -> Result<PerContainer<AggregatedBalance>> {
        self.strategy.compute_all(party, scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaultPoint, MemoryBalanceStore, MemoryWarehouseStore};
    use crate::strategy::Denormalized;
    use depot_common::{Folio, MovementKind};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const CLIENT: PartyId = PartyId::new(11);

    fn client_ledger() -> (MemoryBalanceStore, Ledger<Denormalized>) {
        let store = MemoryBalanceStore::new();
        store.add_party(CLIENT);
        let config = LedgerConfig {
            retry_backoff: Duration::from_millis(1),
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(Denormalized::new(Arc::new(store.clone())), config);
        (store, ledger)
    }

    fn small(kind: MovementKind, qty: u32) -> MovementRequest {
        MovementRequest::single(CLIENT, ContainerType::SmallCrate, kind, qty)
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let (store, ledger) = client_ledger();
        store.inject_fault(FaultPoint::Lock, true);

        let applied = assert_ok!(ledger.apply(&small(MovementKind::Loan, 5)).await);
        assert_eq!(applied.folio, Some(Folio::new(1)));
        assert_eq!(store.movement_count(), 1);

        let metrics = ledger.metrics();
        assert_eq!(metrics.tx_retries, 1);
        assert_eq!(metrics.movements_applied, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let (store, ledger) = client_ledger();
        store.inject_fault(FaultPoint::Commit, false);

        assert_err!(ledger.apply(&small(MovementKind::Loan, 5)).await);
        assert_eq!(ledger.metrics().tx_retries, 0);
        assert_eq!(ledger.metrics().movements_failed, 1);
        assert_eq!(store.movement_count(), 0);
    }

    #[tokio::test]
    async fn test_scenario_fifo_after_partial_collection() {
        let (_, ledger) = client_ledger();
        ledger.apply(&small(MovementKind::Loan, 3)).await.unwrap();
        ledger.apply(&small(MovementKind::Loan, 4)).await.unwrap();

        let detail = ledger.fifo_detail(CLIENT).await.unwrap();
        let remaining: Vec<u64> = detail.pending_loan_batches.iter().map(|b| b.remaining_quantity).collect();
        assert_eq!(remaining, vec![3, 4]);

        ledger.apply(&small(MovementKind::Collection, 5)).await.unwrap();
        let detail = ledger.fifo_detail(CLIENT).await.unwrap();
        let remaining: Vec<u64> = detail.pending_loan_batches.iter().map(|b| b.remaining_quantity).collect();
        assert_eq!(remaining, vec![2]);

        let balance = ledger.balance(CLIENT).await.unwrap();
        assert_eq!(balance.debt.small_crate, 2);
        assert_eq!(detail.per_container_totals.small_crate.outstanding, balance.debt.small_crate);
    }

    #[tokio::test]
    async fn test_movements_paginated() {
        let (_, ledger) = client_ledger();
        for qty in 1..=5 {
            ledger.apply(&small(MovementKind::Loan, qty)).await.unwrap();
        }

        let page = ledger.movements(CLIENT, Some(2), Some(1)).await.unwrap();
        let quantities: Vec<u32> = page.iter().map(|m| m.requested_qty).collect();
        assert_eq!(quantities, vec![4, 3]);

        let err = ledger.movements(CLIENT, Some(0), None).await.unwrap_err();
        assert!(matches!(err, DepotError::InvalidPage(_)));

        let err = ledger.movements(PartyId::new(500), None, None).await.unwrap_err();
        assert!(matches!(err, DepotError::PartyNotFound(_)));
    }

    #[tokio::test]
    async fn test_fifo_unknown_party() {
        let (_, ledger) = client_ledger();
        let err = ledger.fifo_detail(PartyId::new(500)).await.unwrap_err();
        assert!(matches!(err, DepotError::PartyNotFound(_)));

        let empty = ledger.fifo_detail(CLIENT).await.unwrap();
        assert!(empty.pending_loan_batches.is_empty());
    }

    #[tokio::test]
    async fn test_warehouse_ledger_has_no_receipts() {
        let store = MemoryWarehouseStore::new();
        store.add_party(PartyId::new(2));
        let ledger = Ledger::new(Aggregated::new(Arc::new(store)), LedgerConfig::default());
        assert!(!ledger.issues_receipts());

        let request = MovementRequest::single(PartyId::new(2), ContainerType::LargeCrate, MovementKind::Loan, 6);
        let applied = ledger.apply(&request).await.unwrap();
        assert_eq!(applied.folio, None);

        let agg = ledger
            .compute_balance(PartyId::new(2), ContainerType::LargeCrate, BalanceScope::AllTime)
            .await
            .unwrap();
        assert_eq!(agg.debt, 6);
    }
}
