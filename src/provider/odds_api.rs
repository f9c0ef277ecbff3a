//! The Odds API (v4) fetcher.
//!
//! Every request carries one credential from the shared `CredentialSet`.
//! A rate-limit response (HTTP 429, or a JSON body whose `message` mentions
//! quota) rotates to the next credential after an exponential backoff.
//! At most one retry per configured credential is made; transport and
//! decode failures are returned immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CredentialSet, HttpTransport};
use crate::types::{EventOdds, FetchError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com";

/// Maximum bookmakers (and markets) per request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Base delay for exponential backoff between rate-limited attempts.
pub const BASE_BACKOFF_MS: u64 = 1000;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

// ---------------------------------------------------------------------------
// Run-scoped counters
// ---------------------------------------------------------------------------

/// Request accounting for one run. Created per run and shared by reference,
/// never a process-wide global.
#[derive(Debug, Default)]
pub struct FetchStats {
    calls: AtomicU64,
    rate_limited: AtomicU64,
    delay_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStatsSnapshot {
    pub calls: u64,
    pub rate_limited: u64,
    pub total_delay_ms: u64,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rate_limit(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delay(&self, delay: Duration) {
        self.delay_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Total HTTP calls made, including rate-limited ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Time spent sleeping in backoff.
    pub fn total_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            calls: self.calls(),
            rate_limited: self.rate_limited(),
            total_delay_ms: self.delay_ms.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// One per-event request: a chunk of bookmakers crossed with a chunk of markets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub bookmakers: Vec<String>,
    pub markets: Vec<String>,
}

/// Split bookmakers and markets into chunks of at most `batch_size` and
/// return one request per (bookmaker chunk, market chunk) pair.
pub fn plan_batches(bookmakers: &[String], markets: &[String], batch_size: usize) -> Vec<BatchRequest> {
    let size = batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut batches = Vec::new();
    for book_chunk in bookmakers.chunks(size) {
        for market_chunk in markets.chunks(size) {
            batches.push(BatchRequest {
                bookmakers: book_chunk.to_vec(),
                markets: market_chunk.to_vec(),
            });
        }
    }
    batches
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// A successfully decoded provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPayload {
    pub body: Value,
    /// Credential that produced this response.
    pub credential_index: usize,
    /// Calls made, including rate-limited ones.
    pub attempts: u32,
    pub requests_remaining: Option<u64>,
    pub requests_used: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub base_url: String,
    pub regions: String,
    pub backoff_base: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            regions: "us".to_string(),
            backoff_base: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

pub struct OddsFetcher {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialSet>,
    stats: Arc<FetchStats>,
    settings: FetcherSettings,
}

impl OddsFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialSet>,
        stats: Arc<FetchStats>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            transport,
            credentials,
            stats,
            settings,
        }
    }

    pub fn stats(&self) -> &Arc<FetchStats> {
        &self.stats
    }

    pub fn games_url(&self, sport: &str) -> String {
        format!(
            "{}/v4/sports/{}/odds",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(sport)
        )
    }

    pub fn event_odds_url(&self, sport: &str, event_id: &str) -> String {
        format!(
            "{}/v4/sports/{}/events/{}/odds",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(sport),
            urlencoding::encode(event_id)
        )
    }

    /// GET `url` with `params`, rotating credentials on rate limits.
    pub async fn fetch(&self, url: &str, params: &[(String, String)]) -> Result<FetchedPayload, FetchError> {
        let mut index = self.credentials.current_index();
        let mut retries: u32 = 0;

        loop {
            if retries > 0 {
                let delay = backoff_delay(self.settings.backoff_base, retries);
                self.stats.record_delay(delay);
                debug!(url, retries, delay_ms = delay.as_millis() as u64, credential = index, "Retrying after rate limit");
                tokio::time::sleep(delay).await;
            }

            let mut query = params.to_vec();
            query.push(("apiKey".to_string(), self.credentials.key(index).to_string()));

            self.stats.record_call();
            let response = self
                .transport
                .get(url, &query)
                .await
                .map_err(|e| FetchError::Transport(format!("{e:#}")))?;

            // 429 is checked before decoding; its body may not be JSON.
            if response.status != HTTP_TOO_MANY_REQUESTS {
                let body: Value = serde_json::from_str(&response.body)
                    .map_err(|e| FetchError::Decode(format!("HTTP {}: {e}", response.status)))?;

                if !is_quota_message(&body) {
                    if !response.is_success() {
                        return Err(FetchError::Transport(format!(
                            "HTTP {}: {}",
                            response.status,
                            error_message(&body)
                        )));
                    }
                    return Ok(FetchedPayload {
                        body,
                        credential_index: index,
                        attempts: retries + 1,
                        requests_remaining: response.requests_remaining,
                        requests_used: response.requests_used,
                    });
                }
            }

            self.stats.record_rate_limit();

            if retries as usize >= self.credentials.len() {
                warn!(url, attempts = retries + 1, "Rate limited on every credential, giving up");
                return Err(FetchError::RetriesExhausted { attempts: retries + 1 });
            }

            retries += 1;
            let previous = index;
            index = self.credentials.advance_from(index);
            warn!(url, from = previous, to = index, "Rate limited, rotating credential");
        }
    }

    /// The per-sport game listing, used to discover events.
    pub async fn fetch_games(&self, sport: &str, bookmakers: &[String]) -> Result<Vec<EventOdds>, FetchError> {
        let params = vec![
            ("regions".to_string(), self.settings.regions.clone()),
            ("bookmakers".to_string(), bookmakers.join(",")),
            ("oddsFormat".to_string(), "decimal".to_string()),
            ("dateFormat".to_string(), "iso".to_string()),
        ];
        let payload = self.fetch(&self.games_url(sport), &params).await?;
        serde_json::from_value(payload.body).map_err(|e| FetchError::Decode(format!("game list: {e}")))
    }

    /// Odds for one event, restricted to one batch of bookmakers and markets.
    pub async fn fetch_event_batch(
        &self,
        sport: &str,
        event_id: &str,
        batch: &BatchRequest,
    ) -> Result<EventOdds, FetchError> {
        let params = vec![
            ("regions".to_string(), self.settings.regions.clone()),
            ("markets".to_string(), batch.markets.join(",")),
            ("bookmakers".to_string(), batch.bookmakers.join(",")),
            ("oddsFormat".to_string(), "decimal".to_string()),
            ("dateFormat".to_string(), "iso".to_string()),
        ];
        let payload = self.fetch(&self.event_odds_url(sport, event_id), &params).await?;

        debug!(
            event_id,
            markets = %batch.markets.join(","),
            credential = payload.credential_index,
            attempts = payload.attempts,
            requests_remaining = ?payload.requests_remaining,
            "Fetched event odds"
        );

        serde_json::from_value(payload.body)
            .map_err(|e| FetchError::Decode(format!("event {event_id}: {e}")))
    }
}

/// Delay before retry `n` (1-based): base * 2^(n-1).
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(2u32.pow(exponent))
}

fn is_quota_message(body: &Value) -> bool {
    body.get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.to_lowercase().contains("quota"))
}

fn error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
