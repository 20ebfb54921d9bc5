//! PostgreSQL implementation of the ledger stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use depot_common::{
    BatchId, ContainerCatalog, ContainerType, DepotError, Folio, MovementId, MovementKind,
    PartyId, PerContainer, Result, VendorId,
};

use crate::balance::{Balance, MovementTotals};
use crate::movement::{AuditSnapshot, BalanceScope, MovementRecord, NewMovement, Page};
use crate::store::{BalanceStore, BalanceTx, WarehouseStore, WarehouseTx};
use crate::transition::Position;

/// Catalog tables a deployment may carry, tried in order.
const CATALOG_SOURCES: [(&str, &str); 2] = [
    ("envase", "SELECT id::INTEGER, nombre::TEXT FROM envase"),
    ("tipos_cajas", "SELECT id::INTEGER, nombre::TEXT FROM tipos_cajas"),
];

/// Bind the container catalog present in the database.
pub async fn load_catalog(pool: &PgPool) -> Result<ContainerCatalog> {
    for (table, select) in CATALOG_SOURCES {
        let present: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(pool)
            .await
            .map_err(db_error)?;

        if !present {
            debug!(table, "Catalog table not present");
            continue;
        }

        let rows: Vec<(i32, String)> = sqlx::query_as(select)
            .fetch_all(pool)
            .await
            .map_err(db_error)?;
        let catalog = ContainerCatalog::from_entries(table, rows)?;

        info!(
            source = table,
            small_crate = catalog.id_of(ContainerType::SmallCrate),
            large_crate = catalog.id_of(ContainerType::LargeCrate),
            bucket = catalog.id_of(ContainerType::Bucket),
            "Container catalog bound"
        );
        return Ok(catalog);
    }

    Err(DepotError::CatalogEntryNotFound(
        "no container catalog table (envase, tipos_cajas)".to_string(),
    ))
}

/// Classify a driver error.
fn db_error(err: sqlx::Error) -> DepotError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // deadlock_detected, serialization_failure, lock_not_available
            Some("40P01") | Some("40001") | Some("55P03") => {
                DepotError::TransactionConflict(db.message().to_string())
            }
            _ => DepotError::Database(err.to_string()),
        },
        sqlx::Error::PoolTimedOut => DepotError::Timeout("database connection acquire".to_string()),
        _ => DepotError::Database(err.to_string()),
    }
}

fn count(column: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| DepotError::Corrupt(format!("{column} is negative: {value}")))
}

fn quantity(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| DepotError::Corrupt(format!("{column} is negative: {value}")))
}

fn to_db(column: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| DepotError::Internal(format!("{column} out of range: {value}")))
}

fn qty_to_db(column: &str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| DepotError::Internal(format!("{column} out of range: {value}")))
}

fn parse_kind(value: &str) -> Result<MovementKind> {
    value
        .parse()
        .map_err(|_| DepotError::Corrupt(format!("unknown movement kind {value:?}")))
}

async fn party_exists(pool: &PgPool, table_query: &str, party: PartyId) -> Result<bool> {
    sqlx::query_scalar(table_query)
        .bind(party.get())
        .fetch_one(pool)
        .await
        .map_err(db_error)
}

// --- Client <-> vendor ledger ---

const BALANCE_COLUMNS: &str = "client_id, debt_small, debt_large, debt_bucket, \
     credit_small, credit_large, credit_bucket, folio, updated_at";

const CLIENT_MOVEMENT_COLUMNS: &str = "id, client_id, vendor_id, kind, container_type, \
     requested_qty, applied_qty, before_debt, after_debt, before_credit, after_credit, \
     overflow_generated, folio, batch_id, note, created_at";

#[derive(sqlx::FromRow)]
struct BalanceRow {
    client_id: i64,
    debt_small: i64,
    debt_large: i64,
    debt_bucket: i64,
    credit_small: i64,
    credit_large: i64,
    credit_bucket: i64,
    folio: i64,
    updated_at: DateTime<Utc>,
}

impl BalanceRow {
    fn into_balance(self) -> Result<Balance> {
        Ok(Balance {
            party_id: PartyId::new(self.client_id),
            debt: PerContainer {
                small_crate: count("debt_small", self.debt_small)?,
                large_crate: count("debt_large", self.debt_large)?,
                bucket: count("debt_bucket", self.debt_bucket)?,
            },
            credit: PerContainer {
                small_crate: count("credit_small", self.credit_small)?,
                large_crate: count("credit_large", self.credit_large)?,
                bucket: count("credit_bucket", self.credit_bucket)?,
            },
            folio: Some(Folio::new(self.folio)),
            updated_at: Some(self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ClientMovementRow {
    id: i64,
    client_id: i64,
    vendor_id: Option<i64>,
    kind: String,
    container_type: i32,
    requested_qty: i32,
    applied_qty: i32,
    before_debt: i64,
    after_debt: i64,
    before_credit: i64,
    after_credit: i64,
    overflow_generated: i64,
    folio: i64,
    batch_id: Option<i64>,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl ClientMovementRow {
    fn into_record(self, catalog: &ContainerCatalog) -> Result<MovementRecord> {
        Ok(MovementRecord {
            id: MovementId::new(self.id),
            party_id: PartyId::new(self.client_id),
            vendor_id: self.vendor_id.map(VendorId::new),
            kind: parse_kind(&self.kind)?,
            container_type: catalog.resolve(self.container_type)?,
            requested_qty: quantity("requested_qty", self.requested_qty)?,
            applied_qty: quantity("applied_qty", self.applied_qty)?,
            batch_id: self.batch_id.map(BatchId::new),
            note: self.note,
            created_at: self.created_at,
            audit: Some(AuditSnapshot {
                before: Position::new(
                    count("before_debt", self.before_debt)?,
                    count("before_credit", self.before_credit)?,
                ),
                after: Position::new(
                    count("after_debt", self.after_debt)?,
                    count("after_credit", self.after_credit)?,
                ),
                overflow_generated: count("overflow_generated", self.overflow_generated)?,
                folio: Folio::new(self.folio),
            }),
        })
    }
}

/// Client↔vendor ledger on PostgreSQL.
#[derive(Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
    catalog: Arc<ContainerCatalog>,
}

impl PgBalanceStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool, catalog: Arc<ContainerCatalog>) -> Self {
        Self { pool, catalog }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        party_exists(&self.pool, "SELECT EXISTS (SELECT 1 FROM clients WHERE id = $1)", party).await
    }

    async fn read_balance(&self, party: PartyId) -> Result<Option<Balance>> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM client_container_balances WHERE client_id = $1");
        let row: Option<BalanceRow> = sqlx::query_as(&sql)
            .bind(party.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(BalanceRow::into_balance).transpose()
    }

    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {CLIENT_MOVEMENT_COLUMNS} FROM client_container_movements \
             WHERE client_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows: Vec<ClientMovementRow> = sqlx::query_as(&sql)
            .bind(party.get())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(|r| r.into_record(&self.catalog)).collect()
    }

    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {CLIENT_MOVEMENT_COLUMNS} FROM client_container_movements \
             WHERE client_id = $1 ORDER BY container_type, created_at, id"
        );
        let rows: Vec<ClientMovementRow> = sqlx::query_as(&sql)
            .bind(party.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(|r| r.into_record(&self.catalog)).collect()
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn BalanceTx + 'a>> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgBalanceTx {
            tx,
            catalog: &self.catalog,
        }))
    }
}

struct PgBalanceTx<'a> {
    tx: Transaction<'static, Postgres>,
    catalog: &'a ContainerCatalog,
}

#[async_trait]
impl<'a> BalanceTx for PgBalanceTx<'a> {
    async fn lock_balance(&mut self, party: PartyId) -> Result<Balance> {
        // A first movement has no row to lock yet; create the zero row so
        // the locking read below always finds one.
        sqlx::query(
            "INSERT INTO client_container_balances (client_id) VALUES ($1) \
             ON CONFLICT (client_id) DO NOTHING",
        )
        .bind(party.get())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM client_container_balances WHERE client_id = $1 FOR UPDATE"
        );
        let row: BalanceRow = sqlx::query_as(&sql)
            .bind(party.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.into_balance()
    }

    async fn upsert_balance(&mut self, balance: &Balance) -> Result<()> {
        let folio = balance.folio.unwrap_or_default();
        sqlx::query(
            "INSERT INTO client_container_balances \
                 (client_id, debt_small, debt_large, debt_bucket, \
                  credit_small, credit_large, credit_bucket, folio, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, clock_timestamp()) \
             ON CONFLICT (client_id) DO UPDATE SET \
                 debt_small = EXCLUDED.debt_small, \
                 debt_large = EXCLUDED.debt_large, \
                 debt_bucket = EXCLUDED.debt_bucket, \
                 credit_small = EXCLUDED.credit_small, \
                 credit_large = EXCLUDED.credit_large, \
                 credit_bucket = EXCLUDED.credit_bucket, \
                 folio = EXCLUDED.folio, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(balance.party_id.get())
        .bind(to_db("debt_small", balance.debt.small_crate)?)
        .bind(to_db("debt_large", balance.debt.large_crate)?)
        .bind(to_db("debt_bucket", balance.debt.bucket)?)
        .bind(to_db("credit_small", balance.credit.small_crate)?)
        .bind(to_db("credit_large", balance.credit.large_crate)?)
        .bind(to_db("credit_bucket", balance.credit.bucket)?)
        .bind(folio.get())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord> {
        let audit = movement.audit.ok_or_else(|| {
            DepotError::Internal("client movement written without audit snapshot".to_string())
        })?;

        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO client_container_movements \
                 (client_id, vendor_id, kind, container_type, requested_qty, applied_qty, \
                  before_debt, after_debt, before_credit, after_credit, overflow_generated, \
                  folio, batch_id, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING id, created_at",
        )
        .bind(movement.party_id.get())
        .bind(movement.vendor_id.map(|v| v.get()))
        .bind(movement.kind.as_str())
        .bind(self.catalog.id_of(movement.container_type))
        .bind(qty_to_db("requested_qty", movement.requested_qty)?)
        .bind(qty_to_db("applied_qty", movement.applied_qty)?)
        .bind(to_db("before_debt", audit.before.debt)?)
        .bind(to_db("after_debt", audit.after.debt)?)
        .bind(to_db("before_credit", audit.before.credit)?)
        .bind(to_db("after_credit", audit.after.credit)?)
        .bind(to_db("overflow_generated", audit.overflow_generated)?)
        .bind(audit.folio.get())
        .bind(movement.batch_id.map(|b| b.get()))
        .bind(movement.note.as_deref())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(movement.into_record(MovementId::new(id), created_at))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

// --- Vendor <-> warehouse ledger ---

const WAREHOUSE_MOVEMENT_COLUMNS: &str =
    "id, vendor_id, kind, container_type, requested_qty, applied_qty, batch_id, note, created_at";

const TOTALS_SELECT: &str = "SELECT container_type, \
     COALESCE(SUM(applied_qty) FILTER (WHERE kind = 'loan'), 0)::BIGINT, \
     COALESCE(SUM(applied_qty) FILTER (WHERE kind = 'collection'), 0)::BIGINT \
     FROM vendor_container_movements";

#[derive(sqlx::FromRow)]
struct WarehouseMovementRow {
    id: i64,
    vendor_id: i64,
    kind: String,
    container_type: i32,
    requested_qty: i32,
    applied_qty: i32,
    batch_id: Option<i64>,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl WarehouseMovementRow {
    fn into_record(self, catalog: &ContainerCatalog) -> Result<MovementRecord> {
        Ok(MovementRecord {
            id: MovementId::new(self.id),
            party_id: PartyId::new(self.vendor_id),
            vendor_id: None,
            kind: parse_kind(&self.kind)?,
            container_type: catalog.resolve(self.container_type)?,
            requested_qty: quantity("requested_qty", self.requested_qty)?,
            applied_qty: quantity("applied_qty", self.applied_qty)?,
            batch_id: self.batch_id.map(BatchId::new),
            note: self.note,
            created_at: self.created_at,
            audit: None,
        })
    }
}

fn fold_totals(
    rows: Vec<(i32, i64, i64)>,
    catalog: &ContainerCatalog,
) -> Result<PerContainer<MovementTotals>> {
    let mut totals: PerContainer<MovementTotals> = PerContainer::default();
    for (container_type, loaned, collected) in rows {
        let ct = catalog.resolve(container_type)?;
        totals[ct] = MovementTotals {
            loaned: count("loaned", loaned)?,
            collected: count("collected", collected)?,
        };
    }
    Ok(totals)
}

/// Vendor↔warehouse ledger on PostgreSQL.
#[derive(Clone)]
pub struct PgWarehouseStore {
    pool: PgPool,
    catalog: Arc<ContainerCatalog>,
}

impl PgWarehouseStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool, catalog: Arc<ContainerCatalog>) -> Self {
        Self { pool, catalog }
    }
}

#[async_trait]
impl WarehouseStore for PgWarehouseStore {
    async fn party_exists(&self, party: PartyId) -> Result<bool> {
        party_exists(&self.pool, "SELECT EXISTS (SELECT 1 FROM vendors WHERE id = $1)", party).await
    }

    async fn totals(&self, party: PartyId, scope: BalanceScope) -> Result<PerContainer<MovementTotals>> {
        let (from, to, batch) = match scope {
            BalanceScope::AllTime => (None, None, None),
            BalanceScope::Window(range) => (range.from, range.to, None),
            BalanceScope::Batch(batch) => (None, None, Some(batch.get())),
        };

        let sql = format!(
            "{TOTALS_SELECT} WHERE vendor_id = $1 \
               AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR created_at < $3) \
               AND ($4::BIGINT IS NULL OR batch_id = $4) \
             GROUP BY container_type"
        );
        let rows: Vec<(i32, i64, i64)> = sqlx::query_as(&sql)
            .bind(party.get())
            .bind(from)
            .bind(to)
            .bind(batch)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        fold_totals(rows, &self.catalog)
    }

    async fn movements(&self, party: PartyId, page: Page) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {WAREHOUSE_MOVEMENT_COLUMNS} FROM vendor_container_movements \
             WHERE vendor_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows: Vec<WarehouseMovementRow> = sqlx::query_as(&sql)
            .bind(party.get())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(|r| r.into_record(&self.catalog)).collect()
    }

    async fn history(&self, party: PartyId) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {WAREHOUSE_MOVEMENT_COLUMNS} FROM vendor_container_movements \
             WHERE vendor_id = $1 ORDER BY container_type, created_at, id"
        );
        let rows: Vec<WarehouseMovementRow> = sqlx::query_as(&sql)
            .bind(party.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(|r| r.into_record(&self.catalog)).collect()
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn WarehouseTx + 'a>> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgWarehouseTx {
            tx,
            catalog: &self.catalog,
        }))
    }
}

struct PgWarehouseTx<'a> {
    tx: Transaction<'static, Postgres>,
    catalog: &'a ContainerCatalog,
}

#[async_trait]
impl<'a> WarehouseTx for PgWarehouseTx<'a> {
    async fn lock_party(&mut self, party: PartyId) -> Result<()> {
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM vendors WHERE id = $1 FOR UPDATE")
            .bind(party.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        locked.map(|_| ()).ok_or(DepotError::PartyNotFound(party))
    }

    async fn totals(&mut self, party: PartyId) -> Result<PerContainer<MovementTotals>> {
        let sql = format!("{TOTALS_SELECT} WHERE vendor_id = $1 GROUP BY container_type");
        let rows: Vec<(i32, i64, i64)> = sqlx::query_as(&sql)
            .bind(party.get())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        fold_totals(rows, self.catalog)
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> Result<MovementRecord> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO vendor_container_movements \
                 (vendor_id, kind, container_type, requested_qty, applied_qty, batch_id, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, created_at",
        )
        .bind(movement.party_id.get())
        .bind(movement.kind.as_str())
        .bind(self.catalog.id_of(movement.container_type))
        .bind(qty_to_db("requested_qty", movement.requested_qty)?)
        .bind(qty_to_db("applied_qty", movement.applied_qty)?)
        .bind(movement.batch_id.map(|b| b.get()))
        .bind(movement.note.as_deref())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(movement.into_record(MovementId::new(id), created_at))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

// The `#[sqlx::test]` cases need a PostgreSQL server:
// `DATABASE_URL=postgres://... cargo test -p depot-ledger -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::engine::Ledger;
    use crate::movement::MovementRequest;
    use crate::strategy::{Aggregated, Denormalized};
    use crate::transition;
    use chrono::TimeZone;
    use depot_common::TimeRange;
    use std::time::Duration;

    const CLIENT: PartyId = PartyId::new(7);
    const VENDOR: PartyId = PartyId::new(3);

    async fn external_tables(pool: &PgPool, catalog: &str) {
        let statements = [
            "CREATE TABLE clients (id BIGINT PRIMARY KEY)".to_string(),
            "CREATE TABLE vendors (id BIGINT PRIMARY KEY)".to_string(),
            "INSERT INTO clients (id) VALUES (7), (8)".to_string(),
            "INSERT INTO vendors (id) VALUES (3)".to_string(),
            format!("CREATE TABLE {catalog} (id INTEGER PRIMARY KEY, nombre TEXT NOT NULL)"),
            format!(
                "INSERT INTO {catalog} (id, nombre) VALUES \
                 (11, 'Caja chica'), (12, 'Caja grande'), (13, 'Cubeta'), (14, 'Tarima')"
            ),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(pool).await.unwrap();
        }
    }

    async fn catalog(pool: &PgPool) -> Arc<ContainerCatalog> {
        external_tables(pool, "envase").await;
        Arc::new(load_catalog(pool).await.unwrap())
    }

    async fn client_ledger(pool: &PgPool) -> (PgBalanceStore, Ledger<Denormalized>) {
        let store = PgBalanceStore::new(pool.clone(), catalog(pool).await);
        let ledger = Ledger::new(Denormalized::new(Arc::new(store.clone())), LedgerConfig::default());
        (store, ledger)
    }

    async fn warehouse_ledger(pool: &PgPool) -> Ledger<Aggregated> {
        let store = PgWarehouseStore::new(pool.clone(), catalog(pool).await);
        Ledger::new(Aggregated::new(Arc::new(store)), LedgerConfig::default())
    }

    fn small(party: PartyId, kind: MovementKind, qty: u32) -> MovementRequest {
        MovementRequest::single(party, ContainerType::SmallCrate, kind, qty)
    }

    async fn client_rows(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM client_container_movements")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_driver_errors_classified() {
        assert!(matches!(db_error(sqlx::Error::PoolTimedOut), DepotError::Timeout(_)));
        assert!(matches!(db_error(sqlx::Error::RowNotFound), DepotError::Database(_)));
        assert!(db_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(qty_to_db("requested_qty", u32::MAX), Err(DepotError::Internal(_))));
        assert!(matches!(count("debt_small", -1), Err(DepotError::Corrupt(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_loan_collect_loan(pool: PgPool) {
        let (store, ledger) = client_ledger(&pool).await;

        ledger.apply(&small(CLIENT, MovementKind::Loan, 5)).await.unwrap();
        let applied = ledger.apply(&small(CLIENT, MovementKind::Collection, 8)).await.unwrap();
        assert_eq!(applied.overflow_generated(), 3);
        ledger.apply(&small(CLIENT, MovementKind::Loan, 2)).await.unwrap();

        let balance = store.read_balance(CLIENT).await.unwrap().unwrap();
        assert_eq!(balance.position(ContainerType::SmallCrate), Position::new(2, 3));
        assert_eq!(balance.folio, Some(Folio::new(3)));

        let history = store.history(CLIENT).await.unwrap();
        let folios: Vec<i64> = history.iter().map(|m| m.audit.unwrap().folio.get()).collect();
        assert_eq!(folios, vec![1, 2, 3]);
        assert_eq!(history[1].audit.unwrap().after, Position::new(0, 3));

        let newest = ledger.movements(CLIENT, Some(1), None).await.unwrap();
        assert_eq!(newest[0].kind, MovementKind::Loan);
        assert_eq!(newest[0].requested_qty, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_concurrent_collections_serialize(pool: PgPool) {
        let (store, ledger) = client_ledger(&pool).await;
        ledger.apply(&small(CLIENT, MovementKind::Loan, 5)).await.unwrap();

        let collect = small(CLIENT, MovementKind::Collection, 4);
        let (first, second) = tokio::join!(ledger.apply(&collect), ledger.apply(&collect));
        let mut overflows = vec![first.unwrap().overflow_generated(), second.unwrap().overflow_generated()];
        overflows.sort_unstable();
        assert_eq!(overflows, vec![0, 3]);

        let balance = store.read_balance(CLIENT).await.unwrap().unwrap();
        assert_eq!(balance.position(ContainerType::SmallCrate), Position::new(0, 3));
        assert_eq!(balance.folio, Some(Folio::new(3)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_replay_follows_lock_order(pool: PgPool) {
        let (store, ledger) = client_ledger(&pool).await;

        // Open the later writer first so its transaction predates the loan.
        let mut late = store.begin().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ledger.apply(&small(CLIENT, MovementKind::Loan, 5)).await.unwrap();

        let request = small(CLIENT, MovementKind::Collection, 3);
        let mut balance = late.lock_balance(CLIENT).await.unwrap();
        let folio = balance.folio.unwrap_or_default().next();
        let step = transition::apply(request.kind, 3, balance.position(ContainerType::SmallCrate));
        balance.set_position(ContainerType::SmallCrate, step.after);
        balance.folio = Some(folio);
        late.upsert_balance(&balance).await.unwrap();
        let audit = AuditSnapshot::of(&step, folio);
        let row = NewMovement::for_line(&request, ContainerType::SmallCrate, &step, Some(audit));
        late.insert_movement(row).await.unwrap();
        late.commit().await.unwrap();

        let history = store.history(CLIENT).await.unwrap();
        let folios: Vec<i64> = history.iter().map(|m| m.audit.unwrap().folio.get()).collect();
        assert_eq!(folios, vec![1, 2]);

        let detail = ledger.fifo_detail(CLIENT).await.unwrap();
        let totals = detail.per_container_totals.small_crate;
        assert_eq!(totals.outstanding, 2);
        assert_eq!(totals.unmatched_collected, 0);
        assert_eq!(totals.outstanding, balance.debt.small_crate);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_rollback_leaves_nothing(pool: PgPool) {
        let (store, _) = client_ledger(&pool).await;

        let request = small(PartyId::new(8), MovementKind::Loan, 4);
        let mut tx = store.begin().await.unwrap();
        let mut balance = tx.lock_balance(request.party).await.unwrap();
        let step = transition::apply(request.kind, 4, balance.position(ContainerType::SmallCrate));
        balance.set_position(ContainerType::SmallCrate, step.after);
        balance.folio = Some(Folio::new(1));
        tx.upsert_balance(&balance).await.unwrap();
        let audit = AuditSnapshot::of(&step, Folio::new(1));
        let row = NewMovement::for_line(&request, ContainerType::SmallCrate, &step, Some(audit));
        tx.insert_movement(row).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.read_balance(request.party).await.unwrap().is_none());
        assert_eq!(client_rows(&pool).await, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_failed_insert_aborts_transaction(pool: PgPool) {
        let (store, ledger) = client_ledger(&pool).await;
        ledger.apply(&small(CLIENT, MovementKind::Loan, 6)).await.unwrap();

        let request = small(CLIENT, MovementKind::Collection, 2);
        let mut tx = store.begin().await.unwrap();
        let mut balance = tx.lock_balance(CLIENT).await.unwrap();
        let step = transition::apply(request.kind, 2, balance.position(ContainerType::SmallCrate));
        balance.set_position(ContainerType::SmallCrate, step.after);
        balance.folio = Some(Folio::new(2));
        tx.upsert_balance(&balance).await.unwrap();

        // requested_qty must be positive
        let audit = AuditSnapshot::of(&step, Folio::new(2));
        let mut row = NewMovement::for_line(&request, ContainerType::SmallCrate, &step, Some(audit));
        row.requested_qty = 0;
        let err = tx.insert_movement(row).await.unwrap_err();
        assert!(matches!(err, DepotError::Database(_)));
        tx.rollback().await.unwrap();

        let balance = store.read_balance(CLIENT).await.unwrap().unwrap();
        assert_eq!(balance.position(ContainerType::SmallCrate), Position::new(6, 0));
        assert_eq!(balance.folio, Some(Folio::new(1)));
        assert_eq!(client_rows(&pool).await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_lock_timeout_is_a_conflict(pool: PgPool) {
        let (store, ledger) = client_ledger(&pool).await;
        ledger.apply(&small(CLIENT, MovementKind::Loan, 1)).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_balance(CLIENT).await.unwrap();

        let mut waiter = PgBalanceTx {
            tx: pool.begin().await.unwrap(),
            catalog: &store.catalog,
        };
        sqlx::query("SET LOCAL lock_timeout = '100ms'")
            .execute(&mut *waiter.tx)
            .await
            .unwrap();
        let err = waiter.lock_balance(CLIENT).await.unwrap_err();
        assert!(matches!(err, DepotError::TransactionConflict(_)));
        assert!(err.is_retryable());

        Box::new(waiter).rollback().await.unwrap();
        holder.rollback().await.unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_warehouse_scoped_sums(pool: PgPool) {
        let ledger = warehouse_ledger(&pool).await;
        let batch = BatchId::new(55);

        ledger
            .apply(&small(VENDOR, MovementKind::Loan, 10).with_batch(batch))
            .await
            .unwrap();
        ledger.apply(&small(VENDOR, MovementKind::Loan, 6)).await.unwrap();
        ledger
            .apply(&small(VENDOR, MovementKind::Collection, 4).with_batch(batch))
            .await
            .unwrap();

        // One movement per day from 2026-03-01, in insertion order.
        sqlx::query(
            "UPDATE vendor_container_movements SET created_at = TIMESTAMPTZ '2026-03-01 00:00:00+00' \
             + (id - (SELECT MIN(id) FROM vendor_container_movements)) * INTERVAL '1 day'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let day = |d: u32| Utc.with_ymd_and_hms(2026, 3, d, 0, 0, 0).unwrap();
        let sum = |scope| ledger.compute_balance(VENDOR, ContainerType::SmallCrate, scope);

        let all = sum(BalanceScope::AllTime).await.unwrap();
        assert_eq!((all.loaned, all.collected, all.debt), (16, 4, 12));

        let window = TimeRange::new(Some(day(2)), Some(day(3))).unwrap();
        let second_day = sum(BalanceScope::Window(window)).await.unwrap();
        assert_eq!((second_day.loaned, second_day.collected), (6, 0));

        let open_ended = TimeRange::new(Some(day(2)), None).unwrap();
        let since = sum(BalanceScope::Window(open_ended)).await.unwrap();
        assert_eq!((since.loaned, since.collected, since.debt), (6, 4, 2));

        let batched = sum(BalanceScope::Batch(batch)).await.unwrap();
        assert_eq!((batched.loaned, batched.collected, batched.debt), (10, 4, 6));

        let buckets = ledger
            .compute_balance(VENDOR, ContainerType::Bucket, BalanceScope::AllTime)
            .await
            .unwrap();
        assert_eq!(buckets.loaned, 0);

        let err = ledger
            .apply(&small(PartyId::new(99), MovementKind::Loan, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::PartyNotFound(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_catalog_falls_back_to_tipos_cajas(pool: PgPool) {
        let err = load_catalog(&pool).await.unwrap_err();
        assert!(matches!(err, DepotError::CatalogEntryNotFound(_)));

        external_tables(&pool, "tipos_cajas").await;
        let catalog = load_catalog(&pool).await.unwrap();
        assert_eq!(catalog.source(), "tipos_cajas");
        assert_eq!(catalog.id_of(ContainerType::LargeCrate), 12);
        assert_eq!(catalog.resolve(13).unwrap(), ContainerType::Bucket);
        assert!(catalog.resolve(14).is_err());
    }
}
