//! Balances summed from the movement log on demand.
//!
//! No balance row exists and no receipt number is issued. The write path
//! still locks the vendor so that the before/after positions it reports
//! are consistent with concurrent writers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use depot_common::{ContainerType, DepotError, MovementKind, PartyId, PerContainer, Result};

use crate::balance::{AggregatedBalance, Balance, MovementTotals};
use crate::movement::{BalanceScope, MovementRecord, MovementRequest, NewMovement, Page};
use crate::store::{WarehouseStore, WarehouseTx};
use crate::strategy::{AppliedLine, AppliedMovement, BalanceStrategy};
use crate::transition::Transition;

/// Vendor↔warehouse balance strategy.
#[derive(Clone)]
pub struct Aggregated {
    store: Arc<dyn WarehouseStore>,
}

impl Aggregated {
    /// Create a strategy over a warehouse store.
    pub fn new(store: Arc<dyn WarehouseStore>) -> Self {
        Self { store }
    }

    /// Aggregated balance of one container type within `scope`.
    #[instrument(skip(self))]
    pub async fn compute_balance(
        &self,
        party: PartyId,
        container_type: ContainerType,
        scope: BalanceScope,
    ) -> Result<AggregatedBalance> {
        let totals = self.scoped_totals(party, scope).await?;
        Ok(AggregatedBalance::new(container_type, totals[container_type]))
    }

    /// Aggregated balance of every container type within `scope`.
    #[instrument(skip(self))]
    pub async fn compute_all(
        &self,
        party: PartyId,
        scope: BalanceScope,
    ) -> Result<PerContainer<AggregatedBalance>> {
        let totals = self.scoped_totals(party, scope).await?;
        Ok(totals.map(|ct, t| AggregatedBalance::new(ct, *t)))
    }

    async fn scoped_totals(&self, party: PartyId, scope: BalanceScope) -> Result<PerContainer<MovementTotals>> {
        let totals = self.store.totals(party, scope).await?;
        let empty = totals.iter().all(|(_, t)| *t == MovementTotals::default());
        // An empty scope is a zero balance only for a vendor that exists.
        if empty && !self.party_exists(party).await? {
            return Err(DepotError::PartyNotFound(party));
        }
        Ok(totals)
    }

    async fn write(tx: &mut (dyn WarehouseTx + '_), request: &MovementRequest) -> Result<AppliedMovement> {
        tx.lock_party(request.party).await?;
        let mut totals = tx.totals(request.party).await?;

        let mut lines = Vec::new();
        for (ct, qty) in request.lines() {
            let before = totals[ct].position();
            match request.kind {
                MovementKind::Loan => totals[ct].loaned += u64::from(qty),
                MovementKind::Collection => totals[ct].collected += u64::from(qty),
            }
            let after = totals[ct].position();

            let step = Transition {
                kind: request.kind,
                requested: qty,
                applied: qty,
                before,
                after,
                overflow_to_credit: after.credit.saturating_sub(before.credit),
            };
            let record = tx
                .insert_movement(NewMovement::for_line(request, ct, &step, None))
                .await?;
            lines.push(AppliedLine {
                container_type: ct,
                movement_id: record.id,
                transition: step,
            });
        }

        Ok(AppliedMovement {
            party_id: request.party,
            kind: request.kind,
            folio: None,
            lines,
            balance_after: Balance::from_totals(request.party, &totals),
        })
    }
}

#[async_trait]
impl BalanceStrategy for Aggregated {
    fn name(&self) -> &'static str {
        "aggregated"
    }

    fn issues_receipts(&self) -> bool {
        false
    }

    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        if !party.is_valid() {
            return Ok(false);
        }
        self.store.party_exists(party).await
    }

    async fn balance(&self, party: PartyId) -> Result<Balance> {
        let totals = self.scoped_totals(party, BalanceScope::AllTime).await?;
        Ok(Balance::from_totals(party, &totals))
    }

    #[instrument(skip(self, request), fields(party = %request.party, kind = %request.kind))]
    async fn apply(&self, request: &MovementRequest) -> Result<AppliedMovement> {
        request.validate()?;
        if !self.store.party_exists(request.party).await? {
            return Err(DepotError::PartyNotFound(request.party));
        }

        let mut tx = self.store.begin().await?;
        let applied = match Self::write(tx.as_mut(), request).await {
            Ok(applied) => applied,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        info!(
            lines = applied.lines.len(),
            applied_qty = applied.applied_qty(),
            "Warehouse movement applied"
        );

        Ok(applied)
    }

    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>> {
        self.store.movements(party, page).await
    }

    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>> {
        self.store.history(party).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaultPoint, MemoryWarehouseStore};
    use chrono::Duration;
    use depot_common::{BatchId, TimeRange};

    const VENDOR: PartyId = PartyId::new(3);

    fn setup() -> (MemoryWarehouseStore, Aggregated) {
        let store = MemoryWarehouseStore::new();
        store.add_party(VENDOR);
        let strategy = Aggregated::new(Arc::new(store.clone()));
        (store, strategy)
    }

    fn bucket(kind: MovementKind, qty: u32) -> MovementRequest {
        MovementRequest::single(VENDOR, ContainerType::Bucket, kind, qty)
    }

    #[tokio::test]
    async fn test_balance_summed_from_movements() {
        let (_, strategy) = setup();
        strategy.apply(&bucket(MovementKind::Loan, 10)).await.unwrap();
        strategy.apply(&bucket(MovementKind::Collection, 4)).await.unwrap();

        let agg = strategy
            .compute_balance(VENDOR, ContainerType::Bucket, BalanceScope::AllTime)
            .await
            .unwrap();
        assert_eq!((agg.loaned, agg.collected, agg.debt, agg.credit), (10, 4, 6, 0));

        let balance = strategy.balance(VENDOR).await.unwrap();
        assert_eq!(balance.debt.bucket, 6);
        assert_eq!(balance.folio, None);
    }

    #[tokio::test]
    async fn test_over_collection_reports_credit() {
        let (_, strategy) = setup();
        strategy.apply(&bucket(MovementKind::Loan, 2)).await.unwrap();
        let applied = strategy.apply(&bucket(MovementKind::Collection, 5)).await.unwrap();

        assert_eq!(applied.folio, None);
        assert_eq!(applied.overflow_generated(), 3);
        let line = &applied.lines[0];
        assert_eq!((line.transition.before.debt, line.transition.after.credit), (2, 3));
    }

    #[tokio::test]
    async fn test_batch_scope() {
        let (_, strategy) = setup();
        strategy
            .apply(&bucket(MovementKind::Loan, 8).with_batch(BatchId::new(1)))
            .await
            .unwrap();
        strategy
            .apply(&bucket(MovementKind::Loan, 5).with_batch(BatchId::new(2)))
            .await
            .unwrap();
        strategy
            .apply(&bucket(MovementKind::Collection, 6).with_batch(BatchId::new(1)))
            .await
            .unwrap();

        let first = strategy
            .compute_balance(VENDOR, ContainerType::Bucket, BalanceScope::Batch(BatchId::new(1)))
            .await
            .unwrap();
        assert_eq!((first.loaned, first.collected, first.debt), (8, 6, 2));

        let all = strategy.compute_all(VENDOR, BalanceScope::AllTime).await.unwrap();
        assert_eq!(all.bucket.debt, 7);
        assert_eq!(all.small_crate.loaned, 0);
    }

    #[tokio::test]
    async fn test_window_scope() {
        let (_, strategy) = setup();
        strategy.apply(&bucket(MovementKind::Loan, 4)).await.unwrap();

        let now = depot_common::now();
        let past = TimeRange::new(Some(now - Duration::days(2)), Some(now - Duration::days(1))).unwrap();
        let recent = TimeRange::new(Some(now - Duration::hours(1)), None).unwrap();

        let empty = strategy
            .compute_balance(VENDOR, ContainerType::Bucket, BalanceScope::Window(past))
            .await
            .unwrap();
        assert_eq!(empty.loaned, 0);

        let covered = strategy
            .compute_balance(VENDOR, ContainerType::Bucket, BalanceScope::Window(recent))
            .await
            .unwrap();
        assert_eq!(covered.loaned, 4);
    }

    #[tokio::test]
    async fn test_unknown_vendor() {
        let (_, strategy) = setup();
        let err = strategy.balance(PartyId::new(42)).await.unwrap_err();
        assert!(matches!(err, DepotError::PartyNotFound(_)));

        let zero = strategy.balance(VENDOR).await.unwrap();
        assert_eq!(zero.total_debt(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_every_line() {
        let (store, strategy) = setup();
        let request = MovementRequest::new(
            VENDOR,
            MovementKind::Loan,
            PerContainer { small_crate: 1, large_crate: 1, bucket: 1 },
        );

        store.inject_fault(FaultPoint::Commit, false);
        assert!(strategy.apply(&request).await.is_err());
        assert_eq!(store.movement_count(), 0);

        strategy.apply(&request).await.unwrap();
        assert_eq!(store.movement_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_see_each_other() {
        let (store, strategy) = setup();
        store.set_latency(std::time::Duration::from_millis(10));
        let strategy = Arc::new(strategy);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let strategy = Arc::clone(&strategy);
                tokio::spawn(async move { strategy.apply(&bucket(MovementKind::Loan, 3)).await })
            })
            .collect();

        let mut befores = Vec::new();
        for handle in handles {
            let applied = handle.await.unwrap().unwrap();
            befores.push(applied.lines[0].transition.before.debt);
        }
        befores.sort_unstable();
        assert_eq!(befores, vec![0, 3, 6, 9]);
    }
}
