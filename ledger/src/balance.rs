//! Balance shapes returned by the two balance strategies.

use serde::{Deserialize, Serialize};

use depot_common::{ContainerType, Folio, PartyId, PerContainer, Timestamp};

use crate::transition::Position;

/// A party's container balance.
///
/// The denormalized strategy reads this from the balance row and always
/// carries a folio; the aggregated strategy derives it from ledger totals
/// and has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Party the balance belongs to.
    pub party_id: PartyId,
    /// Containers owed, per type.
    pub debt: PerContainer<u64>,
    /// Containers returned in excess, per type.
    pub credit: PerContainer<u64>,
    /// Receipt number of the last accepted movement.
    pub folio: Option<Folio>,
    /// When the balance row was last written.
    pub updated_at: Option<Timestamp>,
}

impl Balance {
    /// Balance of a party with no recorded movements.
    pub fn zero(party_id: PartyId) -> Self {
        Self {
            party_id,
            debt: PerContainer::default(),
            credit: PerContainer::default(),
            folio: Some(Folio::ZERO),
            updated_at: None,
        }
    }

    /// Balance derived from per-type ledger totals. Carries no folio.
    pub fn from_totals(party_id: PartyId, totals: &PerContainer<MovementTotals>) -> Self {
        let positions = totals.map(|_, t| t.position());
        Self {
            party_id,
            debt: positions.map(|_, p| p.debt),
            credit: positions.map(|_, p| p.credit),
            folio: None,
            updated_at: None,
        }
    }

    /// Position for one container type.
    pub fn position(&self, ct: ContainerType) -> Position {
        Position::new(self.debt[ct], self.credit[ct])
    }

    /// Overwrite the position for one container type.
    pub fn set_position(&mut self, ct: ContainerType, position: Position) {
        self.debt[ct] = position.debt;
        self.credit[ct] = position.credit;
    }

    /// Total containers owed across types.
    pub fn total_debt(&self) -> u64 {
        self.debt.iter().map(|(_, v)| *v).sum()
    }
}

/// Loaned and collected sums for one container type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementTotals {
    pub loaned: u64,
    pub collected: u64,
}

impl MovementTotals {
    /// Net position implied by the totals.
    pub fn position(&self) -> Position {
        Position::from_totals(self.loaned, self.collected)
    }
}

/// Result of an on-demand balance aggregation for one container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBalance {
    pub container_type: ContainerType,
    pub loaned: u64,
    pub collected: u64,
    pub debt: u64,
    pub credit: u64,
}

impl AggregatedBalance {
    /// Build from ledger totals.
    pub fn new(container_type: ContainerType, totals: MovementTotals) -> Self {
        let position = totals.position();
        Self {
            container_type,
            loaned: totals.loaned,
            collected: totals.collected,
            debt: position.debt,
            credit: position.credit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_balance() {
        let balance = Balance::zero(PartyId::new(9));
        assert_eq!(balance.total_debt(), 0);
        assert_eq!(balance.folio, Some(Folio::ZERO));
        assert!(balance.position(ContainerType::Bucket).is_settled());
    }

    #[test]
    fn test_balance_from_totals() {
        let mut totals: PerContainer<MovementTotals> = PerContainer::default();
        totals[ContainerType::SmallCrate] = MovementTotals { loaned: 10, collected: 4 };
        totals[ContainerType::Bucket] = MovementTotals { loaned: 1, collected: 3 };

        let balance = Balance::from_totals(PartyId::new(2), &totals);
        assert_eq!(balance.debt.small_crate, 6);
        assert_eq!(balance.credit.bucket, 2);
        assert_eq!(balance.debt.bucket, 0);
        assert_eq!(balance.folio, None);
    }

    #[test]
    fn test_aggregated_balance() {
        let agg = AggregatedBalance::new(
            ContainerType::LargeCrate,
            MovementTotals { loaned: 3, collected: 5 },
        );
        assert_eq!(agg.debt, 0);
        assert_eq!(agg.credit, 2);
    }
}
