//! Balance strategies.
//!
//! The client↔vendor ledger keeps a running balance row per party and
//! stamps every accepted movement with a receipt number. The
//! vendor↔warehouse ledger keeps only the movement log and sums it when a
//! balance is asked for. Both sit behind [`BalanceStrategy`].

use async_trait::async_trait;
use serde::Serialize;

use depot_common::{ContainerType, Folio, MovementId, MovementKind, PartyId, Result};

use crate::balance::Balance;
use crate::movement::{MovementRecord, MovementRequest, Page};
use crate::transition::Transition;

pub mod aggregated;
pub mod denormalized;

pub use aggregated::Aggregated;
pub use denormalized::Denormalized;

/// One applied line of a movement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedLine {
    pub container_type: ContainerType,
    pub movement_id: MovementId,
    pub transition: Transition,
}

/// Outcome of an accepted movement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMovement {
    pub party_id: PartyId,
    pub kind: MovementKind,
    /// Receipt number; only issued by strategies that keep one.
    pub folio: Option<Folio>,
    pub lines: Vec<AppliedLine>,
    pub balance_after: Balance,
}

impl AppliedMovement {
    /// Quantity applied across lines.
    pub fn applied_qty(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.transition.applied)).sum()
    }

    /// Quantity converted to credit across lines.
    pub fn overflow_generated(&self) -> u64 {
        self.lines.iter().map(|l| l.transition.overflow_to_credit).sum()
    }
}

/// How a ledger stores and derives balances.
#[async_trait]
pub trait BalanceStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Check if accepted movements carry a receipt number.
    fn issues_receipts(&self) -> bool;

    /// Check if the party exists.
    async fn party_exists(&self, party: PartyId) -> Result<bool>;

    /// Current all-time balance. Zero for a known party without movements.
    async fn balance(&self, party: PartyId) -> Result<Balance>;

    /// Apply a movement request in one transaction.
    async fn apply(&self, request: &MovementRequest) -> Result<AppliedMovement>;

    /// Movements of a party, newest first.
    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>>;

    /// Every movement of a party, in replay order.
    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>>;
}
