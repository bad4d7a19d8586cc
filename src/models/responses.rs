//! Response DTOs for the cache layer API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::feed::EventKind;
use crate::fetch::{Fetched, Freshness};

/// Response body for GET /resources/:key and GET /aggregates/:key
#[derive(Debug, Clone, Serialize)]
pub struct ReadResponse {
    pub key: String,
    pub value: Value,
    /// `fresh`, `stale` or `stale_input`
    pub freshness: Freshness,
}

impl ReadResponse {
    pub fn new(key: impl Into<String>, fetched: Fetched<Value>) -> Self {
        Self {
            key: key.into(),
            value: fetched.value,
            freshness: fetched.freshness,
        }
    }
}

/// Response body for POST /events
#[derive(Debug, Clone, Serialize)]
pub struct EventAccepted {
    pub message: String,
    pub resource: String,
    pub event: EventKind,
}

impl EventAccepted {
    pub fn new(resource: impl Into<String>, event: EventKind) -> Self {
        let resource = resource.into();
        Self {
            message: format!("Change to '{}' queued", resource),
            resource,
            event,
        }
    }
}

/// Response body for POST /refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    /// Number of targets resolved after invalidation
    pub refreshed: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
