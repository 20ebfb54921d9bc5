//! Simulation metrics.

use depot_common::{DepotError, ErrorKind, MovementKind};
use depot_ledger::AppliedMovement;

/// Outcomes of the movement requests a run submitted.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    /// Movement requests attempted.
    pub total_movements: u64,
    /// Requests the ledger accepted.
    pub accepted_movements: u64,
    /// Requests refused before any transaction (bad input, unknown party).
    pub rejected_movements: u64,
    /// Requests whose transaction aborted, retries included.
    pub failed_movements: u64,
    /// Containers handed out by accepted loans.
    pub loaned_units: u64,
    /// Containers taken back by accepted collections.
    pub collected_units: u64,
    /// Collected containers that exceeded the debt and became credit.
    pub overflow_units: u64,
    /// Receipt numbers issued.
    pub receipts_issued: u64,
    latencies_ms: Vec<u64>,
}

impl SimulationMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted movement.
    pub fn record_applied(&mut self, latency_ms: u64, applied: &AppliedMovement) {
        self.total_movements += 1;
        self.accepted_movements += 1;
        match applied.kind {
            MovementKind::Loan => self.loaned_units += applied.applied_qty(),
            MovementKind::Collection => self.collected_units += applied.applied_qty(),
        }
        self.overflow_units += applied.overflow_generated();
        if applied.folio.is_some() {
            self.receipts_issued += 1;
        }
        self.latencies_ms.push(latency_ms);
    }

    /// Record a movement the ledger did not accept.
    pub fn record_error(&mut self, error: &DepotError) {
        self.total_movements += 1;
        match error.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => self.rejected_movements += 1,
            ErrorKind::Transient | ErrorKind::Internal => self.failed_movements += 1,
        }
    }

    /// Share of requests accepted.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_movements == 0 {
            return 0.0;
        }
        self.accepted_movements as f64 / self.total_movements as f64
    }

    /// Latency of accepted movements at `percentile` (0-100).
    pub fn latency_ms(&self, percentile: usize) -> u64 {
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_unstable();
        match sorted.len() {
            0 => 0,
            n => sorted[(n * percentile / 100).min(n - 1)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_common::{ContainerType, PartyId};
    use depot_ledger::store::{FaultPoint, MemoryBalanceStore};
    use depot_ledger::{Denormalized, Ledger, LedgerConfig, MovementRequest};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_outcomes_classified() {
        let client = PartyId::new(1);
        let store = MemoryBalanceStore::new();
        store.add_party(client);
        let ledger = Ledger::new(Denormalized::new(Arc::new(store.clone())), LedgerConfig::default());
        let small = |kind, qty| MovementRequest::single(client, ContainerType::SmallCrate, kind, qty);

        let mut metrics = SimulationMetrics::new();
        let loan = ledger.apply(&small(MovementKind::Loan, 5)).await.unwrap();
        metrics.record_applied(10, &loan);
        let collection = ledger.apply(&small(MovementKind::Collection, 8)).await.unwrap();
        metrics.record_applied(30, &collection);

        let unknown = MovementRequest::single(PartyId::new(2), ContainerType::Bucket, MovementKind::Loan, 1);
        metrics.record_error(&ledger.apply(&unknown).await.unwrap_err());

        store.inject_fault(FaultPoint::Commit, false);
        metrics.record_error(&ledger.apply(&small(MovementKind::Loan, 1)).await.unwrap_err());

        assert_eq!(metrics.total_movements, 4);
        assert_eq!(metrics.accepted_movements, 2);
        assert_eq!(metrics.rejected_movements, 1);
        assert_eq!(metrics.failed_movements, 1);
        assert_eq!(metrics.loaned_units, 5);
        assert_eq!(metrics.collected_units, 8);
        assert_eq!(metrics.overflow_units, 3);
        assert_eq!(metrics.receipts_issued, 2);
        assert_eq!(metrics.acceptance_rate(), 0.5);
        assert_eq!(metrics.latency_ms(50), 30);
        assert_eq!(metrics.latency_ms(0), 10);
    }
}
