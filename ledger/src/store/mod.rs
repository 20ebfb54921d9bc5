//! Persistence seams of the two ledgers.
//!
//! Every write goes through a transaction object. Locking methods hold an
//! exclusive per-party lock until `commit` or `rollback`; dropping a
//! transaction without committing rolls it back.

use async_trait::async_trait;

use depot_common::{PartyId, PerContainer, Result};

use crate::balance::{Balance, MovementTotals};
use crate::movement::{BalanceScope, MovementRecord, NewMovement, Page};

pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemoryBalanceStore, MemoryWarehouseStore};
pub use postgres::{load_catalog, PgBalanceStore, PgWarehouseStore};

/// Storage of the client↔vendor ledger: a balance row per client plus the
/// movement log.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Check if the client exists.
    async fn party_exists(&self, party: PartyId) -> Result<bool>;

    /// Read the balance row without locking. Never creates a row.
    async fn read_balance(&self, party: PartyId) -> Result<Option<Balance>>;

    /// Movements of a party, newest first.
    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>>;

    /// Every movement of a party, in replay order.
    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>>;

    /// Open a transaction.
    async fn begin<'a>(&'a self) -> Result<Box<dyn BalanceTx + 'a>>;
}

/// Transaction over the client↔vendor ledger.
#[async_trait]
pub trait BalanceTx: Send {
    /// Read the party's balance under an exclusive lock. A party without a
    /// balance row gets a zero balance.
    async fn lock_balance(&mut self, party: PartyId) -> Result<Balance>;

    /// Insert or overwrite the party's balance row.
    async fn upsert_balance(&mut self, balance: &Balance) -> Result<()>;

    /// Append a movement row.
    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord>;

    /// Commit every statement of the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every statement of the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Storage of the vendor↔warehouse ledger: the movement log only.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Check if the vendor exists.
    async fn party_exists(&self, party: PartyId) -> Result<bool>;

    /// Loaned and collected sums per container type within `scope`.
    async fn totals(&self, party: PartyId, scope: BalanceScope) -> Result<PerContainer<MovementTotals>>;

    /// Movements of a party, newest first.
    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>>;

    /// Every movement of a party, in replay order.
    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>>;

    /// Open a transaction.
    async fn begin<'a>(&'a self) -> Result<Box<dyn WarehouseTx + 'a>>;
}

/// Transaction over the vendor↔warehouse ledger.
#[async_trait]
pub trait WarehouseTx: Send {
    /// Lock the vendor so concurrent movements for it serialize.
    async fn lock_party(&mut self, party: PartyId) -> Result<()>;

    /// All-time totals as seen inside the transaction.
    async fn totals(&mut self, party: PartyId) -> Result<PerContainer<MovementTotals>>;

    /// Append a movement row.
    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord>;

    /// Commit every statement of the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every statement of the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
