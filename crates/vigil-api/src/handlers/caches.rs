//! Dashboard-facing cache handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use vigil_builder::{CacheRead, CacheStatusView};
use vigil_core::{BuildErrorRecord, ProcessingStatus, UsageSignals};

use crate::error::{ApiResult, api_error};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ErrorsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Deserialize)]
pub struct InvalidateParams {
    pub reason: Option<String>,
}

pub async fn list_caches(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<CacheStatusView>>> {
    let views = state.orchestrator.list_status().await.map_err(api_error)?;
    Ok(Json(views))
}

/// Serve the payload, building it first on a cold start.
pub async fn get_cache(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<CacheRead>> {
    let read = state.orchestrator.get(&name).await.map_err(api_error)?;
    Ok(Json(read))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<CacheStatusView>> {
    let view = state.orchestrator.status(&name).await.map_err(api_error)?;
    Ok(Json(view))
}

pub async fn get_processing_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcessingStatus>> {
    let status = state
        .orchestrator
        .processing_status(&name)
        .await
        .map_err(api_error)?;
    Ok(Json(status))
}

/// Start a background build when stale. Never waits for the build.
pub async fn ensure_fresh(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<CacheRead>)> {
    let read = state
        .orchestrator
        .ensure_fresh(&name)
        .await
        .map_err(api_error)?;
    let status = if read.building {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(read)))
}

pub async fn invalidate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<InvalidateParams>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .invalidate(&name, params.reason.as_deref())
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(usage): Json<UsageSignals>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .report_usage(&name, usage)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recent_errors(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ErrorsParams>,
) -> ApiResult<Json<Vec<BuildErrorRecord>>> {
    let errors = state
        .orchestrator
        .recent_errors(&name, params.limit)
        .await
        .map_err(api_error)?;
    Ok(Json(errors))
}
