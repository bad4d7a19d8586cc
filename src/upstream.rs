//! Upstream Module
//!
//! HTTP fetchers for the remote JSON API and the dashboard wiring built
//! on top of them.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::aggregate::{dashboard_counters, StatusClassifier};
use crate::error::{CacheError, Result};
use crate::fetch::{fetcher, Fetcher, Source};
use crate::tasks::RefreshTarget;

/// Cache key of the dashboard counters aggregate.
pub const DASHBOARD_KEY: &str = "counters";

/// Resource whose items are bucketed by status on the dashboard.
pub const STATUS_RESOURCE: &str = "activities";

/// Builds the shared client. The timeout applies to every request.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CacheError::InvalidConfig(format!("HTTP client: {e}")))
}

/// Fetcher that GETs `{base_url}/{resource}` and decodes the JSON body.
///
/// Transport errors, timeouts, non-2xx statuses and undecodable bodies
/// all fail the attempt.
pub fn http_fetcher(client: Client, base_url: &str, resource: &str) -> Fetcher<Value> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), resource);

    fetcher(move || {
        let client = client.clone();
        let url = url.clone();
        async move {
            debug!(url = %url, "Fetching upstream");
            let response = client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("GET {url}"))?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("GET {url} returned {status}");
            }

            response
                .json::<Value>()
                .await
                .with_context(|| format!("GET {url}: invalid JSON body"))
        }
    })
}

/// One HTTP-backed source per resource, cached under the resource name.
pub fn resource_sources(client: &Client, base_url: &str, resources: &[String], ttl: Duration) -> Vec<Source<Value>> {
    resources
        .iter()
        .map(|resource| Source::new(resource.clone(), ttl, http_fetcher(client.clone(), base_url, resource)))
        .collect()
}

/// The dashboard counters aggregate over `sources`.
pub fn dashboard_target(sources: Vec<Source<Value>>, ttl: Duration) -> RefreshTarget<Value> {
    let names: Vec<String> = sources.iter().map(|s| s.key.clone()).collect();
    let status_resource = names
        .iter()
        .any(|name| name == STATUS_RESOURCE)
        .then(|| STATUS_RESOURCE.to_string());

    RefreshTarget::Aggregate {
        key: DASHBOARD_KEY.to_string(),
        combine: dashboard_counters(names, status_resource, StatusClassifier::default()),
        sources,
        ttl,
    }
}
