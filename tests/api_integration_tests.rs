//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint against in-memory
//! upstream fetchers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use feed_cache::{
    api::create_router,
    fetch::{fetcher, RetryPolicy, Source},
    upstream::dashboard_target,
    AppState, CacheLayer, Config, RefreshTarget,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const DEBOUNCE: Duration = Duration::from_millis(20);

// == Helper Functions ==

struct Harness {
    app: Router,
    user_calls: Arc<AtomicUsize>,
    activities_down: Arc<AtomicBool>,
}

fn create_test_app(ttl: Duration) -> Harness {
    let config = Config {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
        },
        debounce: DEBOUNCE,
        ..Config::default()
    };
    let layer: CacheLayer<Value> = CacheLayer::new(&config);

    let user_calls = Arc::new(AtomicUsize::new(0));
    let calls = user_calls.clone();
    let users = Source::new(
        "users",
        ttl,
        fetcher(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(json!((0..n).map(|id| json!({"id": id})).collect::<Vec<_>>())) }
        }),
    );

    let activities_down = Arc::new(AtomicBool::new(false));
    let down = activities_down.clone();
    let activities = Source::new(
        "activities",
        ttl,
        fetcher(move || {
            let down = down.load(Ordering::SeqCst);
            async move {
                if down {
                    anyhow::bail!("503 Service Unavailable");
                }
                Ok(json!({"data": [
                    {"status": "done"},
                    {"status": "in_progress"},
                    {"status": "mystery"}
                ]}))
            }
        }),
    );

    let posts = Source::new("posts", ttl, fetcher(|| async { Err::<Value, _>(anyhow::anyhow!("connection refused")) }));

    let sources = vec![users, activities];
    let mut targets: Vec<RefreshTarget<Value>> = sources.iter().cloned().map(RefreshTarget::Source).collect();
    targets.push(RefreshTarget::Source(posts));
    targets.push(dashboard_target(sources, Duration::from_secs(60)));

    let scheduler = layer.scheduler(targets, None);
    scheduler.start();

    Harness {
        app: create_router(AppState::new(layer, scheduler)),
        user_calls,
        activities_down,
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, Option<Value>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).ok())
}

// == Resource Endpoint Tests ==

#[tokio::test]
async fn test_resource_read_through() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = get(&h.app, "/resources/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "users");
    assert_eq!(json["value"], json!([{"id": 0}]));
    assert_eq!(json["freshness"], "fresh");

    // Second read is a cache hit
    get(&h.app, "/resources/users").await;
    assert_eq!(h.user_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_reads_share_one_fetch() {
    let h = create_test_app(Duration::from_secs(30));

    let reads: Vec<_> = (0..8).map(|_| get(&h.app, "/resources/users")).collect();
    for (status, _) in futures::future::join_all(reads).await {
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(h.user_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_resource_not_found() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = get(&h.app, "/resources/comments").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("comments"));
}

#[tokio::test]
async fn test_failing_resource_is_bad_gateway() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = get(&h.app, "/resources/posts").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("2 attempt(s)"));
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn test_stale_value_served_when_upstream_fails() {
    let h = create_test_app(Duration::from_millis(30));

    let (status, _) = get(&h.app, "/resources/activities").await;
    assert_eq!(status, StatusCode::OK);

    h.activities_down.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, json) = get(&h.app, "/resources/activities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["freshness"], "stale");
    assert_eq!(json["value"]["data"].as_array().unwrap().len(), 3);
}

// == Aggregate Endpoint Tests ==

#[tokio::test]
async fn test_dashboard_counters() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = get(&h.app, "/aggregates/counters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["freshness"], "fresh");
    assert_eq!(json["value"]["users"], 1);
    assert_eq!(json["value"]["activities"], 3);
    assert_eq!(json["value"]["activities_by_status"]["completed"], 1);
    assert_eq!(json["value"]["activities_by_status"]["active"], 1);
    assert_eq!(json["value"]["activities_by_status"]["unclassified"], 1);
}

#[tokio::test]
async fn test_unknown_aggregate_not_found() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, _) = get(&h.app, "/aggregates/leaderboard").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// == Event Endpoint Tests ==

#[tokio::test]
async fn test_event_invalidates_resource_and_dashboard() {
    let h = create_test_app(Duration::from_secs(30));
    get(&h.app, "/aggregates/counters").await;

    let (status, json) = post(&h.app, "/events", r#"{"resource":"users","event":"insert"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json.unwrap()["resource"], "users");

    tokio::time::sleep(DEBOUNCE * 5).await;
    let (_, snapshot) = get(&h.app, "/snapshot").await;
    assert_eq!(snapshot["cached_keys"], json!(["activities"]));

    let (_, json) = get(&h.app, "/aggregates/counters").await;
    assert_eq!(json["value"]["users"], 2);
    assert_eq!(h.user_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_event_empty_resource_rejected() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = post(&h.app, "/events", r#"{"resource":"","event":"update"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.unwrap()["error"].as_str().is_some());
}

#[tokio::test]
async fn test_event_unknown_kind_rejected() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, _) = post(&h.app, "/events", r#"{"resource":"users","event":"upsert"}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// == Refresh / Snapshot / Health Tests ==

#[tokio::test]
async fn test_refresh_refetches_everything() {
    let h = create_test_app(Duration::from_secs(30));
    get(&h.app, "/resources/users").await;

    let (status, json) = post(&h.app, "/refresh", "").await;
    assert_eq!(status, StatusCode::OK);
    // posts always fails
    assert_eq!(json.unwrap()["refreshed"], 3);
    assert_eq!(h.user_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_snapshot_reports_cache_state() {
    let h = create_test_app(Duration::from_secs(30));
    get(&h.app, "/resources/users").await;
    get(&h.app, "/resources/users").await;
    get(&h.app, "/resources/comments").await;

    let (status, json) = get(&h.app, "/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cached_keys"], json!(["users"]));
    assert_eq!(json["pending_keys"], json!([]));
    assert_eq!(json["stats"]["hits"], 1);
    assert_eq!(json["stats"]["misses"], 1);
    assert!(json["last_updated"].is_string());
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = create_test_app(Duration::from_secs(30));

    let (status, json) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}
