//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Cloneable because a single failed fetch is delivered to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Every retry attempt failed and no previous value was available
    #[error("Fetch failed for '{key}' after {attempts} attempt(s): {last_error}")]
    FetchFailed {
        key: String,
        attempts: u32,
        last_error: String,
    },

    /// A source of an aggregate failed without a stale fallback
    #[error("Aggregate '{key}' unavailable: {reason}")]
    AggregateFailed { key: String, reason: String },

    /// Unknown resource or aggregate
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (e.g. a fetch task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::FetchFailed { .. } => StatusCode::BAD_GATEWAY,
            CacheError::AggregateFailed { .. } => StatusCode::BAD_GATEWAY,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_error_status_codes() {
        let test_cases = vec![
            (
                CacheError::FetchFailed {
                    key: "users".to_string(),
                    attempts: 3,
                    last_error: "timeout".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CacheError::AggregateFailed {
                    key: "counters".to_string(),
                    reason: "users failed".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (CacheError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (
                CacheError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CacheError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected_status) in test_cases {
            assert_eq!(error.into_response().status(), expected_status);
        }
    }

    #[test]
    fn test_fetch_failed_message_carries_last_error() {
        let err = CacheError::FetchFailed {
            key: "posts".to_string(),
            attempts: 2,
            last_error: "503 Service Unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("posts"));
        assert!(msg.contains("2 attempt(s)"));
        assert!(msg.contains("503"));
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = CacheError::NotFound("widgets".to_string()).into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "Not found: widgets");
    }
}
