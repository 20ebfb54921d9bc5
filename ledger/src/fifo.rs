//! FIFO reconstruction of outstanding loans.
//!
//! Replays a party's movements oldest first and matches every collection
//! against the oldest loans still open. The result is an audit view: once a
//! collection exceeds the open loans the excess has nothing to attach to and
//! is only counted, so this view and the running balance agree only while
//! no credit has been generated.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use depot_common::{ContainerType, MovementId, MovementKind, PartyId, PerContainer, Timestamp};

use crate::movement::MovementRecord;

/// A loan (or what is left of it) not yet matched by collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingLoanBatch {
    pub loan_id: MovementId,
    pub party_id: PartyId,
    pub container_type: ContainerType,
    pub remaining_quantity: u64,
    pub loan_timestamp: Timestamp,
}

/// Replay totals for one container type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTotals {
    pub loaned: u64,
    pub collected: u64,
    /// Sum of remaining quantities of open batches.
    pub outstanding: u64,
    /// Collected quantity that found no open loan.
    pub unmatched_collected: u64,
}

/// Reconstructed FIFO view of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FifoDetail {
    pub party_id: PartyId,
    /// Open batches across types, oldest loan first.
    pub pending_loan_batches: Vec<OutstandingLoanBatch>,
    pub per_container_totals: PerContainer<ContainerTotals>,
}

impl FifoDetail {
    /// Open batches of one container type, oldest first.
    pub fn pending_for(&self, ct: ContainerType) -> impl Iterator<Item = &OutstandingLoanBatch> {
        self.pending_loan_batches
            .iter()
            .filter(move |b| b.container_type == ct)
    }
}

/// Rebuild the outstanding loan batches of `party_id` from its movements.
///
/// Movements of other parties are ignored. Input order does not matter; the
/// replay orders by `(container type, timestamp, id)`.
pub fn reconstruct(party_id: PartyId, movements: &[MovementRecord]) -> FifoDetail {
    let mut ordered: Vec<&MovementRecord> = movements
        .iter()
        .filter(|m| m.party_id == party_id)
        .collect();
    ordered.sort_by_key(|m| (m.container_type, m.created_at, m.id));

    let mut queues: PerContainer<VecDeque<OutstandingLoanBatch>> = PerContainer::default();
    let mut totals: PerContainer<ContainerTotals> = PerContainer::default();

    for movement in ordered {
        let ct = movement.container_type;
        let qty = u64::from(movement.applied_qty);

        match movement.kind {
            MovementKind::Loan => {
                totals[ct].loaned += qty;
                if qty > 0 {
                    queues[ct].push_back(OutstandingLoanBatch {
                        loan_id: movement.id,
                        party_id,
                        container_type: ct,
                        remaining_quantity: qty,
                        loan_timestamp: movement.created_at,
                    });
                }
            }
            MovementKind::Collection => {
                totals[ct].collected += qty;
                let unmatched = consume(&mut queues[ct], qty);
                totals[ct].unmatched_collected += unmatched;
            }
        }
    }

    let mut pending_loan_batches = Vec::new();
    for ct in ContainerType::ALL {
        totals[ct].outstanding = queues[ct].iter().map(|b| b.remaining_quantity).sum();
        pending_loan_batches.extend(queues[ct].drain(..));
    }
    pending_loan_batches.sort_by_key(|b| (b.loan_timestamp, b.loan_id));

    FifoDetail {
        party_id,
        pending_loan_batches,
        per_container_totals: totals,
    }
}

/// Consume `qty` from the head of the queue. Returns what could not be
/// matched.
fn consume(queue: &mut VecDeque<OutstandingLoanBatch>, mut qty: u64) -> u64 {
    while qty > 0 {
        let Some(head) = queue.front_mut() else {
            break;
        };
        let take = head.remaining_quantity.min(qty);
        head.remaining_quantity -= take;
        qty -= take;
        if head.remaining_quantity == 0 {
            queue.pop_front();
        }
    }
    qty
}
