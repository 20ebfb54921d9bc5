//! Movement records, movement requests and read scopes.

use serde::{Deserialize, Serialize};

use depot_common::{
    BatchId, ContainerType, DepotError, Folio, MovementId, MovementKind, PartyId, PerContainer,
    Result, TimeRange, Timestamp, VendorId,
};

use crate::transition::{Position, Transition};

/// Before/after image written with every client movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSnapshot {
    pub before: Position,
    pub after: Position,
    pub overflow_generated: u64,
    pub folio: Folio,
}

impl AuditSnapshot {
    /// Snapshot of a transition stamped with the folio it was accepted under.
    pub fn of(transition: &Transition, folio: Folio) -> Self {
        Self {
            before: transition.before,
            after: transition.after,
            overflow_generated: transition.overflow_to_credit,
            folio,
        }
    }
}

/// An immutable row of the movement ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRecord {
    pub id: MovementId,
    pub party_id: PartyId,
    /// Vendor that performed the movement, when recorded.
    pub vendor_id: Option<VendorId>,
    pub kind: MovementKind,
    pub container_type: ContainerType,
    pub requested_qty: u32,
    pub applied_qty: u32,
    /// Load or unload event the movement belongs to.
    pub batch_id: Option<BatchId>,
    pub note: Option<String>,
    pub created_at: Timestamp,
    /// Present only in the denormalized ledger.
    pub audit: Option<AuditSnapshot>,
}

/// A movement row about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub party_id: PartyId,
    pub vendor_id: Option<VendorId>,
    pub kind: MovementKind,
    pub container_type: ContainerType,
    pub requested_qty: u32,
    pub applied_qty: u32,
    pub batch_id: Option<BatchId>,
    pub note: Option<String>,
    pub audit: Option<AuditSnapshot>,
}

impl NewMovement {
    /// Row for one line of a request.
    pub fn for_line(
        request: &MovementRequest,
        container_type: ContainerType,
        transition: &Transition,
        audit: Option<AuditSnapshot>,
    ) -> Self {
        Self {
            party_id: request.party,
            vendor_id: request.actor,
            kind: request.kind,
            container_type,
            requested_qty: transition.requested,
            applied_qty: transition.applied,
            batch_id: request.batch,
            note: request.note.clone(),
            audit,
        }
    }

    /// Attach the identity assigned by the store.
    pub fn into_record(self, id: MovementId, created_at: Timestamp) -> MovementRecord {
        MovementRecord {
            id,
            party_id: self.party_id,
            vendor_id: self.vendor_id,
            kind: self.kind,
            container_type: self.container_type,
            requested_qty: self.requested_qty,
            applied_qty: self.applied_qty,
            batch_id: self.batch_id,
            note: self.note,
            created_at,
            audit: self.audit,
        }
    }
}

/// Largest quantity a single movement line may carry. Movement rows store
/// quantities as `INTEGER`.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// A request to move containers between a party and its counterpart.
///
/// One request may carry a quantity for each container type; all of them
/// are accepted or rejected together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub party: PartyId,
    pub actor: Option<VendorId>,
    pub kind: MovementKind,
    pub quantities: PerContainer<u32>,
    pub batch: Option<BatchId>,
    pub note: Option<String>,
}

impl MovementRequest {
    /// Create a request over several container types.
    pub fn new(party: PartyId, kind: MovementKind, quantities: PerContainer<u32>) -> Self {
        Self {
            party,
            actor: None,
            kind,
            quantities,
            batch: None,
            note: None,
        }
    }

    /// Create a request for a single container type.
    pub fn single(party: PartyId, container_type: ContainerType, kind: MovementKind, quantity: u32) -> Self {
        let mut quantities = PerContainer::default();
        quantities[container_type] = quantity;
        Self::new(party, kind, quantities)
    }

    /// Record the acting vendor.
    pub fn with_actor(mut self, actor: VendorId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Attach a note. Blank notes are dropped.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        let trimmed = note.trim();
        self.note = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Correlate with a load or unload event.
    pub fn with_batch(mut self, batch: BatchId) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Lines with a positive quantity, in catalog order.
    pub fn lines(&self) -> Vec<(ContainerType, u32)> {
        self.quantities
            .iter()
            .filter(|(_, qty)| **qty > 0)
            .map(|(ct, qty)| (ct, *qty))
            .collect()
    }

    /// Reject requests that cannot be applied, before any transaction.
    pub fn validate(&self) -> Result<()> {
        if !self.party.is_valid() {
            return Err(DepotError::PartyNotFound(self.party));
        }
        let lines = self.lines();
        if lines.is_empty() {
            return Err(DepotError::EmptyMovement);
        }
        if let Some((ct, qty)) = lines.into_iter().find(|(_, qty)| *qty > MAX_LINE_QUANTITY) {
            return Err(DepotError::InvalidQuantity {
                container_type: ct,
                quantity: i64::from(qty),
            });
        }
        Ok(())
    }
}

/// Convert request quantities as received on the wire.
///
/// Missing and zero quantities produce no line; negative or oversized ones
/// are rejected.
pub fn quantities_from_wire(
    small_crate: Option<i64>,
    large_crate: Option<i64>,
    bucket: Option<i64>,
) -> Result<PerContainer<u32>> {
    let raw = PerContainer {
        small_crate,
        large_crate,
        bucket,
    };

    let mut quantities = PerContainer::default();
    for (ct, value) in raw.iter() {
        let Some(value) = *value else { continue };
        quantities[ct] = u32::try_from(value)
            .ok()
            .filter(|qty| *qty <= MAX_LINE_QUANTITY)
            .ok_or(DepotError::InvalidQuantity {
                container_type: ct,
                quantity: value,
            })?;
    }
    Ok(quantities)
}

/// Which movements a balance aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceScope {
    /// Every movement of the party.
    #[default]
    AllTime,
    /// Movements created inside a time window.
    Window(TimeRange),
    /// Movements of one load/unload batch.
    Batch(BatchId),
}

impl BalanceScope {
    /// Check if a movement is covered by the scope.
    pub fn includes(&self, movement: &MovementRecord) -> bool {
        match self {
            BalanceScope::AllTime => true,
            BalanceScope::Window(range) => range.contains(movement.created_at),
            BalanceScope::Batch(batch) => movement.batch_id == Some(*batch),
        }
    }
}

/// Pagination of movement listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}
