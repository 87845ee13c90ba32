//! Error handling for REST API
//!
//! Maps `MediaError` onto HTTP statuses with a JSON `{"error": ...}` body.

use crate::media::{MediaError, MediaPath};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    RangeNotSatisfiable { size: u64 },
    TooManyRequests { retry_after: u64 },
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut extra_header = None;
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::RangeNotSatisfiable { size } => {
                extra_header = Some((header::CONTENT_RANGE, format!("bytes */{}", size)));
                (StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable".to_string())
            }
            AppError::TooManyRequests { retry_after } => {
                extra_header = Some((header::RETRY_AFTER, retry_after.to_string()));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("too many failed attempts, retry in {}s", retry_after),
                )
            }
            AppError::Internal(msg) => {
                // SECURITY: Log full details server-side, return generic message to client
                tracing::error!(details = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred".to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        let mut response = (status, Json(body)).into_response();
        if let Some((name, value)) = extra_header {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PathViolation | MediaError::InvalidName(_) | MediaError::Aborted(_) => {
                AppError::BadRequest(err.to_string())
            }
            MediaError::Locked | MediaError::InvalidCredential => AppError::Forbidden(err.to_string()),
            MediaError::NotFound => AppError::NotFound(err.to_string()),
            MediaError::AlreadyExists | MediaError::NotEmpty => AppError::Conflict(err.to_string()),
            MediaError::RangeNotSatisfiable { size } => AppError::RangeNotSatisfiable { size },
            MediaError::TooManyAttempts { retry_after } => AppError::TooManyRequests { retry_after },
            MediaError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // SECURITY: Log the full error server-side but return generic message to client
        tracing::error!("Internal error: {}", err);
        AppError::Internal("An internal error occurred".to_string())
    }
}

// ============================================================================
// PATH VALIDATION
// ============================================================================

/// Parse a client-supplied root-relative path.
///
/// Rejections are logged as security events; the client only sees 400.
pub fn validate_path(raw: &str) -> Result<MediaPath, AppError> {
    MediaPath::parse(raw).map_err(|e| {
        tracing::warn!(path = %raw.escape_debug(), "rejected client path");
        AppError::from(e)
    })
}
