//! API Handlers
//!
//! HTTP request handlers for each cache layer endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetch::Snapshot;
use crate::layer::CacheLayer;
use crate::models::{EventAccepted, EventRequest, HealthResponse, ReadResponse, RefreshResponse};
use crate::tasks::{RefreshTarget, Scheduler};
use crate::upstream::{dashboard_target, http_client, resource_sources};

/// Application state shared across all handlers.
///
/// The scheduler's targets double as the catalogue of readable keys.
#[derive(Clone)]
pub struct AppState {
    pub layer: CacheLayer<Value>,
    pub scheduler: Scheduler<Value>,
}

impl AppState {
    /// Creates a new AppState from a layer and the scheduler driving it.
    pub fn new(layer: CacheLayer<Value>, scheduler: Scheduler<Value>) -> Self {
        Self { layer, scheduler }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Wires one HTTP source per configured resource plus the dashboard
    /// aggregate over all of them. The scheduler is left stopped.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client(config.upstream_timeout)?;
        let layer = CacheLayer::new(config);

        let sources = resource_sources(&client, &config.upstream_url, &config.resources, config.default_ttl);
        let mut targets: Vec<RefreshTarget<Value>> = sources.iter().cloned().map(RefreshTarget::Source).collect();
        targets.push(dashboard_target(sources, config.aggregate_ttl));

        let scheduler = layer.scheduler(targets, config.poll_interval);
        Ok(Self::new(layer, scheduler))
    }

    fn source(&self, key: &str) -> Option<&RefreshTarget<Value>> {
        self.scheduler
            .targets()
            .iter()
            .find(|t| matches!(t, RefreshTarget::Source(s) if s.key == key))
    }

    fn aggregate(&self, key: &str) -> Option<&RefreshTarget<Value>> {
        self.scheduler
            .targets()
            .iter()
            .find(|t| matches!(t, RefreshTarget::Aggregate { key: k, .. } if k == key))
    }
}

/// Handler for GET /resources/:key
///
/// Read-through get of a configured resource.
pub async fn resource_handler(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<ReadResponse>> {
    let target = state
        .source(&key)
        .ok_or_else(|| CacheError::NotFound(format!("resource '{key}'")))?;
    let fetched = state.layer.resolve(target).await?;

    Ok(Json(ReadResponse::new(key, fetched)))
}

/// Handler for GET /aggregates/:key
pub async fn aggregate_handler(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<ReadResponse>> {
    let target = state
        .aggregate(&key)
        .ok_or_else(|| CacheError::NotFound(format!("aggregate '{key}'")))?;
    let fetched = state.layer.resolve(target).await?;

    Ok(Json(ReadResponse::new(key, fetched)))
}

/// Handler for GET /snapshot
pub async fn snapshot_handler(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.layer.snapshot())
}

/// Handler for POST /events
///
/// Queues a push notification; invalidation happens after the debounce
/// window, so the response only confirms acceptance.
pub async fn event_handler(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<(StatusCode, Json<EventAccepted>)> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let event = req.into_event();
    info!(resource = %event.resource, kind = ?event.kind, "Change event received");
    let accepted = EventAccepted::new(event.resource.clone(), event.kind);
    state.layer.publish(event);

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Handler for POST /refresh
pub async fn refresh_handler(State(state): State<AppState>) -> Json<RefreshResponse> {
    let refreshed = state.scheduler.refresh_now().await;
    Json(RefreshResponse { refreshed })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
