use std::fmt::Display;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error half of every handler result: a status and a `{success: false, error}` body.
pub type ApiError = (StatusCode, Json<Value>);

pub type ApiResult = Result<Json<Value>, ApiError>;

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::NOT_FOUND, message)
}

pub fn conflict(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::CONFLICT, message)
}

pub fn internal_error<E: Display>(e: E) -> ApiError {
    tracing::error!("Internal error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn db_error<E: Display>(e: E) -> ApiError {
    tracing::error!("Database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
}
