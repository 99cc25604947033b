//! HTTP endpoint handlers: the submission endpoint and the read-only query
//! surface (spec.md §6). Route shapes follow the teacher's `handlers.rs`
//! (`Router::new().route(...)`, `AppState` injected via `.with_state`).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::chain_gateway::ChainGateway;
use crate::error::AppError;
use crate::intention_handler::{IntentionHandler, IntentionSubmission};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub chain: Arc<ChainGateway>,
    pub intention_handler: Arc<IntentionHandler>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/intentions", post(submit_intention))
        .route("/bundles", get(list_bundles))
        .route("/bundles/{nonce}", get(get_bundle))
        .route("/bundles/{nonce}/cid", get(get_cid))
        .route("/store/status", get(get_store_status))
        .route("/store/status/{cid}", get(get_store_status_by_cid))
        .route("/vaults/{vault}/nonce", get(get_vault_nonce))
        .route("/vaults/{vault}/controllers", get(get_controllers))
        .route("/vaults/{vault}/rules", get(get_rules))
        .route("/vaults/{vault}/balances/{token}", get(get_balance))
        .route("/controllers/{controller}/vaults", get(list_vaults_for))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn get_health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn submit_intention(
    State(state): State<AppState>,
    Json(submission): Json<IntentionSubmission>,
) -> Result<impl IntoResponse, AppError> {
    let execution = state.intention_handler.handle(submission).await?;
    Ok(Json(execution))
}

async fn list_bundles(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let bundles = state.store.list_bundles().await?;
    Ok(Json(bundles))
}

async fn get_bundle(State(state): State<AppState>, Path(nonce): Path<i64>) -> Result<impl IntoResponse, AppError> {
    match state.store.get_bundle(nonce).await? {
        Some(bundle) => Ok(Json(bundle)),
        None => Err(AppError::Validation {
            field: "nonce".to_string(),
            value: nonce.to_string(),
            context: "no bundle with this nonce".to_string(),
        }),
    }
}

async fn get_cid(State(state): State<AppState>, Path(nonce): Path<i64>) -> Result<impl IntoResponse, AppError> {
    match state.store.get_cid(nonce).await? {
        Some(cid) => Ok(Json(cid)),
        None => Err(AppError::Validation {
            field: "nonce".to_string(),
            value: nonce.to_string(),
            context: "no cid indexed for this nonce".to_string(),
        }),
    }
}

async fn get_vault_nonce(State(state): State<AppState>, Path(vault): Path<i64>) -> Result<impl IntoResponse, AppError> {
    let nonce = state.store.get_vault_nonce(vault).await?;
    Ok(Json(serde_json::json!({ "vault": vault, "nonce": nonce })))
}

async fn get_controllers(State(state): State<AppState>, Path(vault): Path<i64>) -> Result<impl IntoResponse, AppError> {
    let controllers = state.store.get_controllers(vault).await?;
    Ok(Json(controllers))
}

async fn get_rules(State(state): State<AppState>, Path(vault): Path<i64>) -> Result<impl IntoResponse, AppError> {
    let vault_row = state.store.get_vault(vault).await?;
    Ok(Json(vault_row.and_then(|v| v.rules)))
}

async fn get_balance(
    State(state): State<AppState>,
    Path((vault, token)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.store.get_balance(vault, &token).await?;
    Ok(Json(serde_json::json!({ "vault": vault, "token": token, "balance": balance.to_string() })))
}

async fn get_store_status(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let initialized = state.chain.store_initialized().await?;
    Ok(Json(serde_json::json!({ "initialized": initialized })))
}

async fn get_store_status_by_cid(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let present = state.chain.store_status(&cid).await?;
    Ok(Json(serde_json::json!({ "cid": cid, "present": present })))
}

async fn list_vaults_for(
    State(state): State<AppState>,
    Path(controller): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let vaults = state.store.list_vaults_for(&controller).await?;
    Ok(Json(vaults))
}
