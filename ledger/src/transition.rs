//! Balance application: the pure transition applied once per movement line.
//!
//! A loan only ever adds to debt; it does not draw down credit the party
//! already holds. A collection pays debt first and converts whatever exceeds
//! the outstanding debt into credit. Neither path can drive a value below
//! zero.

use serde::{Deserialize, Serialize};

use depot_common::MovementKind;

/// Debt and credit of one party for one container type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Containers the party owes.
    pub debt: u64,
    /// Containers returned in excess of debt.
    pub credit: u64,
}

impl Position {
    /// Create a position.
    pub fn new(debt: u64, credit: u64) -> Self {
        Self { debt, credit }
    }

    /// Position derived from ledger totals: the net of loans over
    /// collections is debt, the net of collections over loans is credit.
    pub fn from_totals(loaned: u64, collected: u64) -> Self {
        Self {
            debt: loaned.saturating_sub(collected),
            credit: collected.saturating_sub(loaned),
        }
    }

    /// Check if nothing is owed either way.
    pub fn is_settled(&self) -> bool {
        self.debt == 0 && self.credit == 0
    }
}

/// Outcome of applying one movement line to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Kind of movement applied.
    pub kind: MovementKind,
    /// Quantity the caller asked for.
    pub requested: u32,
    /// Quantity recorded as applied (always the full request).
    pub applied: u32,
    /// Position before the movement.
    pub before: Position,
    /// Position after the movement.
    pub after: Position,
    /// Part of a collection that exceeded debt and became credit.
    pub overflow_to_credit: u64,
}

/// Apply a movement of `quantity` containers to `before`.
pub fn apply(kind: MovementKind, quantity: u32, before: Position) -> Transition {
    let qty = u64::from(quantity);

    let (after, overflow_to_credit) = match kind {
        MovementKind::Loan => (Position::new(before.debt + qty, before.credit), 0),
        MovementKind::Collection if qty <= before.debt => {
            (Position::new(before.debt - qty, before.credit), 0)
        }
        MovementKind::Collection => {
            let overflow = qty - before.debt;
            (Position::new(0, before.credit + overflow), overflow)
        }
    };

    Transition {
        kind,
        requested: quantity,
        applied: quantity,
        before,
        after,
        overflow_to_credit,
    }
}
