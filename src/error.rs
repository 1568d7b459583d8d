//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Request Errors**: malformed or missing fields, unsupported media (400)
/// - **Access Errors**: missing or invalid API key (401), rate limited (429)
/// - **Pipeline Errors**: staging, transcoding or classification failed (500)
/// - **Database Errors**: any sqlx::Error (500, details hidden)
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request body is missing fields or has the wrong shape.
    ///
    /// The String is returned to the client as-is.
    #[error("{0}")]
    Validation(String),

    /// API key is missing, invalid, or revoked.
    #[error("unauthorized")]
    Unauthorized,

    /// Too many requests for the same limiting key.
    #[error("rate limit in place")]
    RateLimited,

    /// Request body exceeded the configured size limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// Declared content type is neither an image nor a video.
    #[error("UnknownContentType: {0}")]
    UnknownContentType(String),

    /// Classifier refused the input (unreachable URL, undecodable media).
    #[error("InternalRequestError: {0}")]
    ClassifierRejected(String),

    /// Writing media to disk failed.
    #[error("staging failed: {0}")]
    Staging(String),

    /// GIF to MP4 conversion failed.
    #[error("transcode failed: {0}")]
    Transcode(String),

    /// Classifier (or content hashing ahead of it) failed.
    #[error("{0}")]
    Classification(String),

    /// Key revocation target does not exist or is already inactive.
    #[error("{0} not found")]
    KeyNotFound(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "status": 429,
///   "msg": "rate limit in place"
/// }
/// ```
///
/// Database errors are logged and replaced by a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation(_)
            | AppError::UnknownContentType(_)
            | AppError::ClassifierRejected(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Staging(_)
            | AppError::Transcode(_)
            | AppError::Classification(_)
            | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let msg = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                "An internal error occurred".to_string()
            }
            ref other => other.to_string(),
        };

        let body = Json(json!({
            "status": status.as_u16(),
            "msg": msg
        }));

        (status, body).into_response()
    }
}
