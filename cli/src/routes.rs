//! HTTP trigger surface: start/stop subscriptions and one-shot fetches.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use ledgerstream_core::error::IngestError;
use ledgerstream_ingest::{
    LedgerEnricher, PersistenceGate, PipelineHandle, SubscriptionError, SubscriptionRegistry,
    TopicFilter, ACCOUNTS_SUBSCRIPTION, LEDGER_SUBSCRIPTION,
};
use ledgerstream_ws::PushChannel;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriptionRegistry>,
    pub channel: Arc<PushChannel>,
    pub enricher: LedgerEnricher,
    pub gate: PersistenceGate,
    pub pipeline: PipelineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ledgers/stream", get(start_ledger_stream))
        .route("/accounts/stream", get(start_accounts_stream))
        .route("/subscriptions", get(list_subscriptions))
        .route("/subscriptions/:name", delete(stop_subscription))
        .route("/ledgers/:index", post(fetch_ledger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Downstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Downstream(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message, "timestamp": Utc::now()}))).into_response()
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::AlreadyActive(_) | SubscriptionError::InvalidParams(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SubscriptionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SubscriptionError::Transport(_) => ApiError::Downstream(err.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation { .. } | IngestError::Decode { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Downstream(err.to_string()),
        }
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

fn ack(status: &str, name: &str) -> Json<Value> {
    Json(json!({"status": status, "subscription": name}))
}

async fn start_ledger_stream(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.registry.start(LEDGER_SUBSCRIPTION, TopicFilter::Ledger).await?;
    Ok(ack("subscribed", LEDGER_SUBSCRIPTION))
}

#[derive(Debug, Deserialize)]
pub struct AccountsQuery {
    #[serde(default)]
    pub accounts: String,
}

/// `"rA, rB,,rC"` → `["rA", "rB", "rC"]`.
fn parse_accounts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

async fn start_accounts_stream(
    State(state): State<AppState>,
    Query(query): Query<AccountsQuery>,
) -> Result<Json<Value>, ApiError> {
    let accounts = parse_accounts(&query.accounts);
    state
        .registry
        .start(ACCOUNTS_SUBSCRIPTION, TopicFilter::Accounts(accounts.clone()))
        .await?;
    Ok(Json(json!({
        "status": "subscribed",
        "subscription": ACCOUNTS_SUBSCRIPTION,
        "accounts": accounts,
    })))
}

async fn stop_subscription(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.stop(&name).await?;
    Ok(ack("unsubscribed", &name))
}

async fn list_subscriptions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "subscriptions": state.registry.active().await,
        "connection": state.channel.status(),
        "pipeline": state.pipeline.stats(),
    }))
}

async fn fetch_ledger(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    if index == 0 {
        return Err(ApiError::BadRequest("ledger index must be positive".into()));
    }
    let event = state.enricher.fetch_ledger(index).await?;
    let outcome = state.gate.persist_ledger(event.clone()).await?;
    Ok(Json(json!({"ledger": event, "result": outcome})))
}
