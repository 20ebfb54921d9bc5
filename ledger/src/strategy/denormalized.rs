//! Running balance row per party, updated with the movement log.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use depot_common::{DepotError, PartyId, Result};

use crate::balance::Balance;
use crate::movement::{AuditSnapshot, MovementRecord, MovementRequest, NewMovement, Page};
use crate::store::{BalanceStore, BalanceTx};
use crate::strategy::{AppliedLine, AppliedMovement, BalanceStrategy};
use crate::transition;

/// Client↔vendor balance strategy.
#[derive(Clone)]
pub struct Denormalized {
    store: Arc<dyn BalanceStore>,
}

impl Denormalized {
    /// Create a strategy over a balance store.
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }

    /// Lock, transition, bump the folio, write the row, append the lines.
    async fn write(tx: &mut (dyn BalanceTx + '_), request: &MovementRequest) -> Result<AppliedMovement> {
        let mut balance = tx.lock_balance(request.party).await?;
        let folio = balance.folio.unwrap_or_default().next();

        let mut pending = Vec::new();
        for (ct, qty) in request.lines() {
            let step = transition::apply(request.kind, qty, balance.position(ct));
            balance.set_position(ct, step.after);
            let row = NewMovement::for_line(request, ct, &step, Some(AuditSnapshot::of(&step, folio)));
            pending.push((ct, step, row));
        }
        balance.folio = Some(folio);

        tx.upsert_balance(&balance).await?;

        let mut lines = Vec::with_capacity(pending.len());
        for (container_type, transition, row) in pending {
            let record = tx.insert_movement(row).await?;
            lines.push(AppliedLine {
                container_type,
                movement_id: record.id,
                transition,
            });
        }

        Ok(AppliedMovement {
            party_id: request.party,
            kind: request.kind,
            folio: Some(folio),
            lines,
            balance_after: balance,
        })
    }
}

#[async_trait]
impl BalanceStrategy for Denormalized {
    fn name(&self) -> &'static str {
        "denormalized"
    }

    fn issues_receipts(&self) -> bool {
        true
    }

    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        if !party.is_valid() {
            return Ok(false);
        }
        self.store.party_exists(party).await
    }

    async fn balance(&self, party: PartyId) -> Result<Balance> {
        if let Some(balance) = self.store.read_balance(party).await? {
            return Ok(balance);
        }
        if !self.party_exists(party).await? {
            return Err(DepotError::PartyNotFound(party));
        }
        Ok(Balance::zero(party))
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
            folio = applied.folio.map(|f| f.get()),
            lines = applied.lines.len(),
            applied_qty = applied.applied_qty(),
            overflow = applied.overflow_generated(),
            "Movement applied"
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
