//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction so error shapes stay
//! uniform across gateway endpoints, and maps broker failures onto the
//! gateway's status taxonomy: 400 malformed input, 404 unknown resource,
//! 409 duplicate create, 503 upstream unavailable, 500 everything else.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use courier_broker::BrokerError;

/// Structured API error: an HTTP status coupled with a JSON error body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn build(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// 404 for an unknown topic or subscription.
pub fn api_not_found(message: &str) -> ApiError {
    build(StatusCode::NOT_FOUND, "not_found", message)
}

/// 400 for malformed bodies or missing/wrong-typed fields. No broker call
/// is attempted for these.
pub fn api_validation_error(message: &str) -> ApiError {
    build(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// 409 for create collisions.
pub fn api_conflict(message: &str) -> ApiError {
    build(StatusCode::CONFLICT, "already_exists", message)
}

/// 503 when the upstream project/broker configuration is unavailable or an
/// upstream delete fails.
pub fn api_unavailable(message: &str) -> ApiError {
    build(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

/// 500 from an unexpected broker error. Details are logged server-side.
pub fn api_internal(message: &str, err: &BrokerError) -> ApiError {
    tracing::error!(error = %err, "broker error");
    build(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}
