//! Operator handlers. Each one is refused unless the caller is an admin.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use vigil_builder::RefreshReceipt;
use vigil_core::{CacheEntry, PolicyUpdate};

use crate::error::{ApiResult, api_error};
use crate::extract::Caller;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RefreshParams {
    /// Hold the response until the build reports its first chunk.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyChangeResponse {
    pub changed: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cache_name: String,
    pub cancelled: bool,
}

/// Register the configured baseline caches. Existing entries keep their state.
pub async fn initialize_defaults(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<Vec<CacheEntry>>> {
    let entries = state
        .orchestrator
        .initialize_defaults(&state.defaults, caller.is_admin)
        .await
        .map_err(api_error)?;
    info!(user = %caller.user, count = entries.len(), "Defaults initialized over HTTP");
    Ok(Json(entries))
}

pub async fn set_policy_all(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(update): Json<PolicyUpdate>,
) -> ApiResult<Json<PolicyChangeResponse>> {
    let changed = state
        .orchestrator
        .set_policy(None, &update, caller.is_admin)
        .await
        .map_err(api_error)?;
    Ok(Json(PolicyChangeResponse { changed }))
}

pub async fn set_policy(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
    Json(update): Json<PolicyUpdate>,
) -> ApiResult<Json<PolicyChangeResponse>> {
    let changed = state
        .orchestrator
        .set_policy(Some(&name), &update, caller.is_admin)
        .await
        .map_err(api_error)?;
    Ok(Json(PolicyChangeResponse { changed }))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
    Query(params): Query<RefreshParams>,
) -> ApiResult<(StatusCode, Json<RefreshReceipt>)> {
    let receipt = state
        .orchestrator
        .refresh(&name, &caller.user, caller.is_admin, params.wait)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state
        .orchestrator
        .cancel(&name, caller.is_admin)
        .await
        .map_err(api_error)?;
    Ok(Json(CancelResponse {
        cache_name: name,
        cancelled,
    }))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<CacheEntry>> {
    let entry = state
        .orchestrator
        .reset(&name, caller.is_admin)
        .await
        .map_err(api_error)?;
    info!(cache = %name, user = %caller.user, "Cache reset over HTTP");
    Ok(Json(entry))
}
