//! HTTP routes and handlers.
//!
//! Handlers only translate between JSON and ledger calls.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use depot_common::{
    BatchId, ContainerType, DepotError, Folio, MovementKind, PartyId, TimeRange, Timestamp,
    VendorId,
};
use depot_ledger::{
    quantities_from_wire, AggregatedBalance, AppliedLine, AppliedMovement, Balance, BalanceScope,
    FifoDetail, MetricsSnapshot, MovementRecord, MovementRequest,
};

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Build the router over both ledgers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/clients/:id/balance", get(client_balance))
        .route(
            "/clients/:id/movements",
            get(client_movements).post(post_client_movement),
        )
        .route("/clients/:id/fifo", get(client_fifo))
        .route("/vendors/:id/warehouse/balance", get(warehouse_balance))
        .route(
            "/vendors/:id/warehouse/movements",
            get(warehouse_movements).post(post_warehouse_movement),
        )
        .route("/vendors/:id/warehouse/fifo", get(warehouse_fifo))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub clients: MetricsSnapshot,
    pub warehouse: MetricsSnapshot,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        clients: state.clients.metrics(),
        warehouse: state.warehouse.metrics(),
    })
}

/// Listing parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Body of a movement request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementBody {
    /// Acting vendor; ignored by the warehouse ledger.
    pub vendor_id: Option<i64>,
    pub kind: String,
    pub qty_small: Option<i64>,
    pub qty_large: Option<i64>,
    pub qty_bucket: Option<i64>,
    pub note: Option<String>,
    pub batch_id: Option<i64>,
}

impl MovementBody {
    fn into_request(self, party: PartyId) -> Result<MovementRequest, DepotError> {
        let kind: MovementKind = self.kind.parse()?;
        let quantities = quantities_from_wire(self.qty_small, self.qty_large, self.qty_bucket)?;

        let mut request = MovementRequest::new(party, kind, quantities);
        if let Some(vendor) = self.vendor_id {
            request = request.with_actor(VendorId::new(vendor));
        }
        if let Some(note) = self.note {
            request = request.with_note(note);
        }
        if let Some(batch) = self.batch_id {
            request = request.with_batch(BatchId::new(batch));
        }
        Ok(request)
    }
}

/// Result of an accepted movement request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementResponse {
    pub applied_qty: u64,
    pub overflow_generated: u64,
    pub balance_after: Balance,
    pub folio: Option<Folio>,
    pub lines: Vec<AppliedLine>,
}

impl From<AppliedMovement> for MovementResponse {
    fn from(applied: AppliedMovement) -> Self {
        Self {
            applied_qty: applied.applied_qty(),
            overflow_generated: applied.overflow_generated(),
            folio: applied.folio,
            balance_after: applied.balance_after,
            lines: applied.lines,
        }
    }
}

pub async fn client_balance(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Balance>> {
    Ok(Json(state.clients.balance(PartyId::new(id)).await?))
}

pub async fn client_movements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<MovementRecord>>> {
    let rows = state
        .clients
        .movements(PartyId::new(id), page.limit, page.offset)
        .await?;
    Ok(Json(rows))
}

pub async fn post_client_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MovementBody>,
) -> ApiResult<(StatusCode, Json<MovementResponse>)> {
    let request = body.into_request(PartyId::new(id))?;
    let applied = state.clients.apply(&request).await?;
    Ok((StatusCode::CREATED, Json(applied.into())))
}

pub async fn client_fifo(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<FifoDetail>> {
    Ok(Json(state.clients.fifo_detail(PartyId::new(id)).await?))
}

/// Scope of a warehouse balance query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub container_type: Option<String>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub batch_id: Option<i64>,
}

impl BalanceQuery {
    fn scope(&self) -> Result<BalanceScope, DepotError> {
        let windowed = self.from.is_some() || self.to.is_some();
        match (self.batch_id, windowed) {
            (Some(_), true) => Err(DepotError::InvalidScope(
                "batchId cannot be combined with from/to".to_string(),
            )),
            (Some(batch), false) => Ok(BalanceScope::Batch(BatchId::new(batch))),
            (None, true) => Ok(BalanceScope::Window(TimeRange::new(self.from, self.to)?)),
            (None, false) => Ok(BalanceScope::AllTime),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseBalanceResponse {
    pub vendor_id: PartyId,
    pub balances: Vec<AggregatedBalance>,
}

pub async fn warehouse_balance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<WarehouseBalanceResponse>> {
    let vendor = PartyId::new(id);
    let scope = query.scope()?;

    let balances = match query.container_type.as_deref() {
        Some(name) => {
            let container_type: ContainerType = name.parse()?;
            vec![state.warehouse.compute_balance(vendor, container_type, scope).await?]
        }
        None => {
            let all = state.warehouse.compute_all(vendor, scope).await?;
            all.iter().map(|(_, b)| *b).collect()
        }
    };

    Ok(Json(WarehouseBalanceResponse {
        vendor_id: vendor,
        balances,
    }))
}

pub async fn warehouse_movements(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<MovementRecord>>> {
    let rows = state
        .warehouse
        .movements(PartyId::new(id), page.limit, page.offset)
        .await?;
    Ok(Json(rows))
}

pub async fn post_warehouse_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MovementBody>,
) -> ApiResult<(StatusCode, Json<MovementResponse>)> {
    let body = MovementBody {
        vendor_id: None,
        ..body
    };
    let request = body.into_request(PartyId::new(id))?;
    let applied = state.warehouse.apply(&request).await?;
    Ok((StatusCode::CREATED, Json(applied.into())))
}

pub async fn warehouse_fifo(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<FifoDetail>> {
    Ok(Json(state.warehouse.fifo_detail(PartyId::new(id)).await?))
}
