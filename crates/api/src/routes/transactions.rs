//! Transaction query endpoints.
//!
//! Read-only surface over the transaction log: every response is derived
//! by replaying logged events, never from worker memory, so answers stay
//! correct across coordinator restarts.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::GlobalTxId;
use coordinator::{CallbackRegistry, GlobalTransaction, GlobalTxState, TransactionRouter};
use serde::{Deserialize, Serialize};
use txlog::{TxEvent, TxLogStore};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub log: Arc<dyn TxLogStore>,
    pub router: TransactionRouter,
    pub registry: CallbackRegistry,
    pub default_retry_budget: i32,
}

impl AppState {
    async fn rebuild(&self, global_tx_id: GlobalTxId) -> Result<GlobalTransaction, ApiError> {
        let events = self.log.events_for(global_tx_id).await?;
        if events.is_empty() {
            return Err(ApiError::NotFound(format!(
                "Transaction {global_tx_id} not found"
            )));
        }
        Ok(GlobalTransaction::from_events(
            &events,
            self.default_retry_budget,
        ))
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct ListParams {
    /// Filter by aggregate state name (e.g. `Compensating`).
    pub state: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize)]
pub struct SlowestParams {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransactionSummary {
    pub global_tx_id: String,
    pub kind: Option<&'static str>,
    pub state: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sub_transactions: usize,
    pub suspend_reason: Option<String>,
}

#[derive(Serialize)]
pub struct SubTransactionResponse {
    pub local_tx_id: String,
    pub parent_tx_id: Option<String>,
    pub service_name: String,
    pub instance_id: String,
    pub state: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub compensation_method: Option<String>,
    pub attempts: i32,
}

#[derive(Serialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub summary: TransactionSummary,
    pub expiration_time: Option<DateTime<Utc>>,
    pub pending_acks: usize,
    pub sub_transaction_details: Vec<SubTransactionResponse>,
}

#[derive(Serialize)]
pub struct TxEventResponse {
    pub event_id: String,
    pub event_type: String,
    pub global_tx_id: String,
    pub local_tx_id: Option<String>,
    pub service_name: String,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: Option<String>,
    pub payload: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total: usize,
    pub by_state: std::collections::BTreeMap<String, usize>,
    pub active_workers: usize,
    pub connected_services: Vec<String>,
}

#[derive(Serialize)]
pub struct SlowTransaction {
    pub global_tx_id: String,
    pub state: String,
    pub duration_ms: i64,
}

fn summarize(machine: &GlobalTransaction, global_tx_id: GlobalTxId) -> TransactionSummary {
    TransactionSummary {
        global_tx_id: global_tx_id.to_string(),
        kind: machine.kind().map(|k| k.as_str()),
        state: machine.state().to_string(),
        begin_time: machine.begin_time(),
        end_time: machine.end_time(),
        sub_transactions: machine.sub_transactions().len(),
        suspend_reason: machine.suspend_reason().map(String::from),
    }
}

// -- Handlers --

/// GET /transactions — list transactions, optionally filtered by state.
#[tracing::instrument(skip(state, params))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TransactionSummary>>, ApiError> {
    let state_filter = match params.state.as_deref() {
        Some(name) => Some(GlobalTxState::parse_str(name).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown transaction state: {name}"))
        })?),
        None => None,
    };
    let limit = params.limit.unwrap_or(50);
    let offset = params.offset.unwrap_or(0);

    let ids = state.log.global_tx_ids().await?;
    let mut summaries = Vec::new();
    for global_tx_id in ids {
        let machine = state.rebuild(global_tx_id).await?;
        if let Some(wanted) = state_filter
            && machine.state() != wanted
        {
            continue;
        }
        summaries.push(summarize(&machine, global_tx_id));
    }

    Ok(Json(summaries.into_iter().skip(offset).take(limit).collect()))
}

/// GET /transactions/:id — full detail for one transaction.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionDetail>, ApiError> {
    let global_tx_id = parse_global_tx_id(&id)?;
    let machine = state.rebuild(global_tx_id).await?;

    let sub_transaction_details = machine
        .sub_transactions()
        .iter()
        .map(|sub| SubTransactionResponse {
            local_tx_id: sub.local_tx_id.to_string(),
            parent_tx_id: sub.parent_tx_id.map(|p| p.to_string()),
            service_name: sub.service_name.clone(),
            instance_id: sub.instance_id.clone(),
            state: sub.state.to_string(),
            begin_time: sub.begin_time,
            end_time: sub.end_time,
            compensation_method: sub.compensation_method.clone(),
            attempts: sub.attempts,
        })
        .collect();

    Ok(Json(TransactionDetail {
        summary: summarize(&machine, global_tx_id),
        expiration_time: machine.expiration_time(),
        pending_acks: machine.pending_acks(),
        sub_transaction_details,
    }))
}

/// GET /transactions/:id/events — the raw event log for one transaction.
#[tracing::instrument(skip(state))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TxEventResponse>>, ApiError> {
    let global_tx_id = parse_global_tx_id(&id)?;
    let events = state.log.events_for(global_tx_id).await?;
    if events.is_empty() {
        return Err(ApiError::NotFound(format!("Transaction {id} not found")));
    }

    let responses = events.into_iter().map(event_response).collect();
    Ok(Json(responses))
}

/// GET /transactions/stats — counts per state plus runtime gauges.
#[tracing::instrument(skip(state))]
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let ids = state.log.global_tx_ids().await?;
    let mut by_state = std::collections::BTreeMap::new();
    let total = ids.len();
    for global_tx_id in ids {
        let machine = state.rebuild(global_tx_id).await?;
        *by_state.entry(machine.state().to_string()).or_insert(0) += 1;
    }

    Ok(Json(StatsResponse {
        total,
        by_state,
        active_workers: state.router.active_workers().await,
        connected_services: state.registry.services().await,
    }))
}

/// GET /transactions/slowest — finished transactions by descending duration.
#[tracing::instrument(skip(state, params))]
pub async fn slowest(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SlowestParams>,
) -> Result<Json<Vec<SlowTransaction>>, ApiError> {
    let limit = params.limit.unwrap_or(10);

    let ids = state.log.global_tx_ids().await?;
    let mut finished = Vec::new();
    for global_tx_id in ids {
        let machine = state.rebuild(global_tx_id).await?;
        if let (Some(begin), Some(end)) = (machine.begin_time(), machine.end_time()) {
            finished.push(SlowTransaction {
                global_tx_id: global_tx_id.to_string(),
                state: machine.state().to_string(),
                duration_ms: (end - begin).num_milliseconds(),
            });
        }
    }
    finished.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
    finished.truncate(limit);

    Ok(Json(finished))
}

fn event_response(event: TxEvent) -> TxEventResponse {
    TxEventResponse {
        event_id: event.event_id.to_string(),
        event_type: event.event_type.to_string(),
        global_tx_id: event.global_tx_id.to_string(),
        local_tx_id: event.local_tx_id.map(|id| id.to_string()),
        service_name: event.service_name,
        instance_id: event.instance_id,
        timestamp: event.timestamp,
        status: event.status.map(|s| s.to_string()),
        payload: String::from_utf8_lossy(&event.payload).into_owned(),
    }
}

fn parse_global_tx_id(id: &str) -> Result<GlobalTxId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(GlobalTxId::from(uuid))
}
