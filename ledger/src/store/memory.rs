//! In-memory ledger stores.
//!
//! Used by the simulator and by tests. Writes are staged inside the
//! transaction and published together on commit, so a failed or dropped
//! transaction leaves no trace. Per-party locks are async mutexes held by
//! the transaction until it ends.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use depot_common::{DepotError, MovementId, MovementKind, PartyId, PerContainer, Result};

use crate::balance::{Balance, MovementTotals};
use crate::movement::{BalanceScope, MovementRecord, NewMovement, Page};
use crate::store::{BalanceStore, BalanceTx, WarehouseStore, WarehouseTx};

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// While taking the party lock.
    Lock,
    /// While appending a movement row.
    MovementInsert,
    /// While committing.
    Commit,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    point: FaultPoint,
    transient: bool,
}

#[derive(Default)]
struct State {
    balances: HashMap<PartyId, Balance>,
    movements: Vec<MovementRecord>,
}

/// State shared by a store and its transactions.
struct Shared {
    parties: RwLock<HashSet<PartyId>>,
    locks: DashMap<PartyId, Arc<AsyncMutex<()>>>,
    state: Mutex<State>,
    next_id: AtomicI64,
    fault: Mutex<Option<Fault>>,
    latency_ms: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            parties: RwLock::new(HashSet::new()),
            locks: DashMap::new(),
            state: Mutex::new(State::default()),
            next_id: AtomicI64::new(1),
            fault: Mutex::new(None),
            latency_ms: AtomicU64::new(0),
        }
    }

    fn party_exists(&self, party: PartyId) -> bool {
        self.parties.read().contains(&party)
    }

    /// Fire the injected fault if it is armed for `point`. One-shot.
    fn check_fault(&self, point: FaultPoint) -> Result<()> {
        let mut slot = self.fault.lock();
        match *slot {
            Some(fault) if fault.point == point => {
                *slot = None;
                debug!(?point, transient = fault.transient, "Injected fault fired");
                let message = format!("injected fault at {point:?}");
                if fault.transient {
                    Err(DepotError::TransactionConflict(message))
                } else {
                    Err(DepotError::Database(message))
                }
            }
            _ => Ok(()),
        }
    }

    async fn acquire(&self, party: PartyId) -> Result<OwnedMutexGuard<()>> {
        self.check_fault(FaultPoint::Lock)?;

        // Clone the handle out so no map shard is held across the await.
        let lock = self
            .locks
            .entry(party)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(guard)
    }

    fn stage(&self, movement: NewMovement) -> Result<MovementRecord> {
        self.check_fault(FaultPoint::MovementInsert)?;
        let id = MovementId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(movement.into_record(id, depot_common::now()))
    }

    fn movements(&self, party: PartyId, page: Page) -> Vec<MovementRecord> {
        let state = self.state.lock();
        let mut rows: Vec<MovementRecord> = state
            .movements
            .iter()
            .filter(|m| m.party_id == party)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect()
    }

    fn history(&self, party: PartyId) -> Vec<MovementRecord> {
        let state = self.state.lock();
        let mut rows: Vec<MovementRecord> = state
            .movements
            .iter()
            .filter(|m| m.party_id == party)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.container_type, m.created_at, m.id));
        rows
    }

    fn totals<'m>(
        movements: impl Iterator<Item = &'m MovementRecord>,
        party: PartyId,
        scope: BalanceScope,
    ) -> PerContainer<MovementTotals> {
        let mut totals: PerContainer<MovementTotals> = PerContainer::default();
        for m in movements.filter(|m| m.party_id == party && scope.includes(m)) {
            let qty = u64::from(m.applied_qty);
            match m.kind {
                MovementKind::Loan => totals[m.container_type].loaned += qty,
                MovementKind::Collection => totals[m.container_type].collected += qty,
            }
        }
        totals
    }

    fn publish(&self, balance: Option<Balance>, movements: Vec<MovementRecord>) -> Result<()> {
        self.check_fault(FaultPoint::Commit)?;
        let mut state = self.state.lock();
        if let Some(mut balance) = balance {
            balance.updated_at = Some(depot_common::now());
            state.balances.insert(balance.party_id, balance);
        }
        state.movements.extend(movements);
        Ok(())
    }
}

macro_rules! test_controls {
    ($store:ident) => {
        impl $store {
            /// Create an empty store with no known parties.
            pub fn new() -> Self {
                Self {
                    shared: Arc::new(Shared::new()),
                }
            }

            /// Register a party so movements for it are accepted.
            pub fn add_party(&self, party: PartyId) {
                self.shared.parties.write().insert(party);
            }

            /// Fail the next operation reaching `point`.
            pub fn inject_fault(&self, point: FaultPoint, transient: bool) {
                *self.shared.fault.lock() = Some(Fault { point, transient });
            }

            /// Hold every party lock for `latency` after acquiring it.
            pub fn set_latency(&self, latency: Duration) {
                self.shared
                    .latency_ms
                    .store(latency.as_millis() as u64, Ordering::Relaxed);
            }

            /// Number of committed movement rows.
            pub fn movement_count(&self) -> usize {
                self.shared.state.lock().movements.len()
            }
        }

        impl Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// Client↔vendor ledger kept in memory.
#[derive(Clone)]
pub struct MemoryBalanceStore {
    shared: Arc<Shared>,
}

test_controls!(MemoryBalanceStore);

impl MemoryBalanceStore {
    /// Check if a balance row exists for the party.
    pub fn has_balance_row(&self, party: PartyId) -> bool {
        self.shared.state.lock().balances.contains_key(&party)
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        Ok(self.shared.party_exists(party))
    }

    async fn read_balance(&self, party: PartyId) -> Result<Option<Balance>> {
        Ok(self.shared.state.lock().balances.get(&party).cloned())
    }

    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>> {
        Ok(self.shared.movements(party, page))
    }

    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>> {
        Ok(self.shared.history(party))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn BalanceTx + 'a>> {
        Ok(Box::new(MemoryBalanceTx {
            shared: &self.shared,
            guard: None,
            balance: None,
            movements: Vec::new(),
        }))
    }
}

struct MemoryBalanceTx<'a> {
    shared: &'a Shared,
    guard: Option<OwnedMutexGuard<()>>,
    balance: Option<Balance>,
    movements: Vec<MovementRecord>,
}

#[async_trait]
impl<'a> BalanceTx for MemoryBalanceTx<'a> {
    async fn lock_balance(&mut self, party: PartyId) -> Result<Balance> {
        if self.guard.is_none() {
            self.guard = Some(self.shared.acquire(party).await?);
        }
        let balance = self.shared.state.lock().balances.get(&party).cloned();
        Ok(balance.unwrap_or_else(|| Balance::zero(party)))
    }

    async fn upsert_balance(&mut self, balance: &Balance) -> Result<()> {
        self.balance = Some(balance.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord> {
        let record = self.shared.stage(movement)?;
        self.movements.push(record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let result = this.shared.publish(this.balance, this.movements);
        drop(this.guard);
        result
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Vendor↔warehouse ledger kept in memory.
#[derive(Clone)]
pub struct MemoryWarehouseStore {
    shared: Arc<Shared>,
}

test_controls!(MemoryWarehouseStore);

#[async_trait]
impl WarehouseStore for MemoryWarehouseStore {
    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        Ok(self.shared.party_exists(party))
    }

    async fn totals(&self, party: PartyId, scope: BalanceScope) -> Result<PerContainer<MovementTotals>> {
        let state = self.shared.state.lock();
        Ok(Shared::totals(state.movements.iter(), party, scope))
    }

    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>> {
        Ok(self.shared.movements(party, page))
    }

    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>> {
        Ok(self.shared.history(party))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn WarehouseTx + 'a>> {
        Ok(Box::new(MemoryWarehouseTx {
            shared: &self.shared,
            guard: None,
            movements: Vec::new(),
        }))
    }
}

struct MemoryWarehouseTx<'a> {
    shared: &'a Shared,
    guard: Option<OwnedMutexGuard<()>>,
    movements: Vec<MovementRecord>,
}

#[async_trait]
impl<'a> WarehouseTx for MemoryWarehouseTx<'a> {
    async fn lock_party(&mut self, party: PartyId) -> Result<()> {
        if !self.shared.party_exists(party) {
            return Err(DepotError::PartyNotFound(party));
        }
        if self.guard.is_none() {
            self.guard = Some(self.shared.acquire(party).await?);
        }
        Ok(())
    }

    async fn totals(&mut self, party: PartyId) -> Result<PerContainer<MovementTotals>> {
        let state = self.shared.state.lock();
        let visible = state.movements.iter().chain(self.movements.iter());
        Ok(Shared::totals(visible, party, BalanceScope::AllTime))
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord> {
        let record = self.shared.stage(movement)?;
        self.movements.push(record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let result = this.shared.publish(None, this.movements);
        drop(this.guard);
        result
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_common::ContainerType;

    fn loan(party: i64, qty: u32) -> NewMovement {
        NewMovement {
            party_id: PartyId::new(party),
            vendor_id: None,
            kind: MovementKind::Loan,
            container_type: ContainerType::SmallCrate,
            requested_qty: qty,
            applied_qty: qty,
            batch_id: None,
            note: None,
            audit: None,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_invisible() {
        let store = MemoryWarehouseStore::new();
        store.add_party(PartyId::new(1));

        let mut tx = store.begin().await.unwrap();
        tx.lock_party(PartyId::new(1)).await.unwrap();
        tx.insert_movement(loan(1, 4)).await.unwrap();

        let inside = tx.totals(PartyId::new(1)).await.unwrap();
        assert_eq!(inside.small_crate.loaned, 4);
        assert_eq!(store.movement_count(), 0);

        tx.rollback().await.unwrap();
        assert_eq!(store.movement_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_movements() {
        let store = MemoryWarehouseStore::new();
        store.add_party(PartyId::new(1));

        let mut tx = store.begin().await.unwrap();
        tx.lock_party(PartyId::new(1)).await.unwrap();
        tx.insert_movement(loan(1, 2)).await.unwrap();
        tx.insert_movement(loan(1, 3)).await.unwrap();
        tx.commit().await.unwrap();

        let totals = store.totals(PartyId::new(1), BalanceScope::AllTime).await.unwrap();
        assert_eq!(totals.small_crate.loaned, 5);

        let page = store
            .movements(PartyId::new(1), Page { limit: 1, offset: 0 })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].applied_qty, 3);
    }

    #[tokio::test]
    async fn test_unknown_party_cannot_be_locked() {
        let store = MemoryWarehouseStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.lock_party(PartyId::new(5)).await.unwrap_err();
        assert!(matches!(err, DepotError::PartyNotFound(_)));
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let store = MemoryBalanceStore::new();
        store.inject_fault(FaultPoint::Commit, true);

        let mut tx = store.begin().await.unwrap();
        let balance = tx.lock_balance(PartyId::new(1)).await.unwrap();
        tx.upsert_balance(&balance).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.has_balance_row(PartyId::new(1)));

        let mut tx = store.begin().await.unwrap();
        let balance = tx.lock_balance(PartyId::new(1)).await.unwrap();
        tx.upsert_balance(&balance).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.has_balance_row(PartyId::new(1)));
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let store = MemoryBalanceStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_balance(PartyId::new(1)).await.unwrap();
        }

        let lock = tokio::time::timeout(Duration::from_secs(1), async {
            let mut tx = store.begin().await.unwrap();
            tx.lock_balance(PartyId::new(1)).await.unwrap();
        })
        .await;
        assert!(lock.is_ok());
    }
}
