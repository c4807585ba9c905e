//! HTTP handlers and the JSON response envelope.
//!
//! Every endpoint answers with the same envelope:
//! `{"success": bool, "message"?, "data"?, "error"?: {code, message, details}}`.
//! Library error kinds map onto status codes here and nowhere else.

pub mod collections;
pub mod sources;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

pub const ERR_CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const ERR_CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const ERR_CODE_CONFLICT: &str = "CONFLICT";
pub const ERR_CODE_UNSUPPORTED: &str = "UNSUPPORTED";
pub const ERR_CODE_UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
pub const ERR_CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub type ApiResult = Result<(StatusCode, Json<ApiResponse>), (StatusCode, Json<ApiResponse>)>;

pub fn success(message: &str, data: Value) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            message: Some(message.to_string()),
            data: Some(data),
            error: None,
        }),
    )
}

pub fn created(message: &str, data: Value) -> (StatusCode, Json<ApiResponse>) {
    let (_, body) = success(message, data);
    (StatusCode::CREATED, body)
}

pub fn failure(
    status: StatusCode,
    code: &str,
    message: &str,
    details: String,
) -> (StatusCode, Json<ApiResponse>) {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: None,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
                details: Some(details),
            }),
        }),
    )
}

/// Translate a library error into the envelope, with `message` naming the
/// failed operation.
pub fn error_response(err: Error, message: &str) -> (StatusCode, Json<ApiResponse>) {
    let (status, code) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, ERR_CODE_NOT_FOUND),
        Error::AlreadyExists(_) => (StatusCode::CONFLICT, ERR_CODE_CONFLICT),
        Error::Invalid(_) => (StatusCode::BAD_REQUEST, ERR_CODE_INVALID_REQUEST),
        Error::Unsupported(_) => (StatusCode::NOT_IMPLEMENTED, ERR_CODE_UNSUPPORTED),
        Error::Transient(_) => (StatusCode::BAD_GATEWAY, ERR_CODE_UPSTREAM_ERROR),
        Error::Corrupt(_) | Error::Io(_) | Error::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ERR_CODE_INTERNAL_ERROR)
        }
    };
    failure(status, code, message, err.to_string())
}
