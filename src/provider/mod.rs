//! Upstream odds provider integration.
//!
//! Defines the `HttpTransport` seam over which every provider request goes,
//! a reqwest-backed implementation of it, and the rate-limit aware fetcher
//! for The Odds API (v4).

pub mod credentials;
pub mod odds_api;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

pub use credentials::CredentialSet;
pub use odds_api::{plan_batches, BatchRequest, FetchStats, FetchStatsSnapshot, FetchedPayload, OddsFetcher};

const HEADER_REQUESTS_REMAINING: &str = "x-requests-remaining";
const HEADER_REQUESTS_USED: &str = "x-requests-used";

/// A provider response before any interpretation. Non-2xx statuses are
/// returned here rather than as errors; the fetcher decides what they mean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub requests_remaining: Option<u64>,
    pub requests_used: Option<u64>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP client.
///
/// Errors are reserved for transport failures (DNS, connect, timeout).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse>;
}

// ---------------------------------------------------------------------------
// reqwest transport
// ---------------------------------------------------------------------------

pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sharpline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build provider HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let requests_remaining = quota_header(headers, HEADER_REQUESTS_REMAINING);
        let requests_used = quota_header(headers, HEADER_REQUESTS_USED);

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;

        debug!(url, status, bytes = body.len(), ?requests_remaining, "Provider response");

        Ok(RawResponse {
            status,
            body,
            requests_remaining,
            requests_used,
        })
    }
}

/// The provider reports quota counters as numbers, sometimes with a
/// fractional part.
fn quota_header(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}
