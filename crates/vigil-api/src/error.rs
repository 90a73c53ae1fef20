//! Mapping of orchestrator errors onto HTTP responses.

use axum::{Json, http::StatusCode};
use serde::Serialize;
use tracing::{debug, error};
use vigil_core::Error;

/// JSON error body. `code` is stable and machine readable.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_remaining: Option<i64>,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);
pub type ApiResult<T> = Result<T, ApiError>;

fn body(code: &'static str, e: &Error) -> Json<ErrorBody> {
    Json(ErrorBody {
        code,
        message: e.to_string(),
        minutes_remaining: None,
    })
}

/// Convert a domain error into a status code and body.
pub fn api_error(e: Error) -> ApiError {
    let (status, body) = match &e {
        Error::CacheNotFound(_) => (StatusCode::NOT_FOUND, body("cache_not_found", &e)),
        Error::NoDataYet(_) => (StatusCode::NOT_FOUND, body("no_data_yet", &e)),
        Error::CooldownActive {
            minutes_remaining, ..
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                code: "cooldown_active",
                message: e.to_string(),
                minutes_remaining: Some(*minutes_remaining),
            }),
        ),
        Error::AuthorizationDenied(_) => (StatusCode::FORBIDDEN, body("forbidden", &e)),
        Error::BuildInProgress(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            body("build_in_progress", &e),
        ),
        Error::AlreadyBuilding(_) => (StatusCode::ACCEPTED, body("already_building", &e)),
        Error::InvalidDefinition(_) => (StatusCode::BAD_REQUEST, body("invalid_request", &e)),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, body("internal", &e)),
    };

    if status.is_server_error() && !e.is_caller_condition() {
        error!(error = %e, "Request failed");
    } else {
        debug!(status = status.as_u16(), error = %e, "Request answered with caller condition");
    }
    (status, body)
}
