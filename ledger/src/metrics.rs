//! Counters for ledger monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use depot_common::{DepotError, ErrorKind};

/// Ledger counters.
pub struct LedgerMetrics {
    /// Movement requests accepted.
    pub movements_applied: AtomicU64,
    /// Movement rows written.
    pub lines_written: AtomicU64,
    /// Requests rejected by validation or a missing party.
    pub movements_rejected: AtomicU64,
    /// Requests that failed after retries or with an internal error.
    pub movements_failed: AtomicU64,
    /// Transient failures seen, retried or not.
    pub tx_conflicts: AtomicU64,
    /// Retries performed.
    pub tx_retries: AtomicU64,
    /// Collected units that exceeded debt and became credit.
    pub overflow_units: AtomicU64,
}

impl LedgerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            movements_applied: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            movements_rejected: AtomicU64::new(0),
            movements_failed: AtomicU64::new(0),
            tx_conflicts: AtomicU64::new(0),
            tx_retries: AtomicU64::new(0),
            overflow_units: AtomicU64::new(0),
        }
    }

    /// Record an accepted movement.
    pub fn movement_applied(&self, lines: usize, overflow: u64) {
        self.movements_applied.fetch_add(1, Ordering::Relaxed);
        self.lines_written.fetch_add(lines as u64, Ordering::Relaxed);
        self.overflow_units.fetch_add(overflow, Ordering::Relaxed);
    }

    /// Record a retry after a transient failure.
    pub fn retry(&self) {
        self.tx_conflicts.fetch_add(1, Ordering::Relaxed);
        self.tx_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a movement that ended in an error.
    pub fn movement_failed(&self, err: &DepotError) {
        match err.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => {
                self.movements_rejected.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Transient => {
                self.tx_conflicts.fetch_add(1, Ordering::Relaxed);
                self.movements_failed.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Internal => {
                self.movements_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            movements_applied: self.movements_applied.load(Ordering::Relaxed),
            lines_written: self.lines_written.load(Ordering::Relaxed),
            movements_rejected: self.movements_rejected.load(Ordering::Relaxed),
            movements_failed: self.movements_failed.load(Ordering::Relaxed),
            tx_conflicts: self.tx_conflicts.load(Ordering::Relaxed),
            tx_retries: self.tx_retries.load(Ordering::Relaxed),
            overflow_units: self.overflow_units.load(Ordering::Relaxed),
        }
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub movements_applied: u64,
    pub lines_written: u64,
    pub movements_rejected: u64,
    pub movements_failed: u64,
    pub tx_conflicts: u64,
    pub tx_retries: u64,
    pub overflow_units: u64,
}
