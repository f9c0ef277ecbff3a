//! SHARPLINE — sharp-bookmaker consensus pricing
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the provider client, runs one aggregation run and reports the
//! consensus per market.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use sharpline::config::AppConfig;
use sharpline::engine::{AggregationRun, RunParams};
use sharpline::provider::odds_api::FetcherSettings;
use sharpline::provider::{CredentialSet, FetchStats, OddsFetcher, ReqwestTransport};
use sharpline::storage::{self, RunSnapshot};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        sport = %cfg.run.sport,
        markets = cfg.run.markets.len(),
        devig = %cfg.run.devig_method,
        "SHARPLINE starting up"
    );

    // -- Provider client -------------------------------------------------

    let credentials = CredentialSet::new(cfg.api_keys()?).context("No usable provider API keys")?;
    info!(keys = credentials.len(), "Loaded provider credentials");

    let transport = ReqwestTransport::new(Duration::from_secs(cfg.provider.request_timeout_secs))?;
    let stats = Arc::new(FetchStats::new());
    let fetcher = Arc::new(OddsFetcher::new(
        Arc::new(transport),
        Arc::new(credentials),
        Arc::clone(&stats),
        FetcherSettings {
            base_url: cfg.provider.base_url.clone(),
            regions: cfg.provider.regions.clone(),
            backoff_base: Duration::from_millis(cfg.provider.backoff_base_ms),
        },
    ));

    // -- Run -------------------------------------------------------------

    let run = AggregationRun::new(fetcher, RunParams::from_config(&cfg));
    let outcome = match run.execute().await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Aggregation run aborted");
            return Err(e);
        }
    };

    for market in outcome.markets.values() {
        let comparisons = market.comparisons();
        info!(
            market = market.key(),
            bookmakers = market.bookmakers().len(),
            enough_data = market.has_enough_data(),
            events_compared = market.events_compared(),
            consensus_entries = market.consensus().len(),
            comparable_quotes = comparisons.len(),
            "Market summary"
        );
        for entry in market.consensus().values() {
            let (primary, secondary) = entry.sides();
            let fair = entry.fair();
            info!(
                market = market.key(),
                outcome = %entry.key(),
                %primary,
                primary_fair = fair.first,
                %secondary,
                secondary_fair = fair.second,
                books_used = ?entry.books_used(),
                "Consensus"
            );
        }
    }

    for issue in &outcome.summary.issues {
        warn!(issue = %issue, "Run issue");
    }

    if let Some(path) = cfg.run.export_path.as_deref() {
        let snapshot = RunSnapshot::new(outcome.summary.clone(), &outcome.markets);
        storage::save_snapshot(&snapshot, path)?;
        info!(path, "Run snapshot exported");
    }

    info!(
        run_id = %outcome.summary.run_id,
        markets = outcome.summary.markets,
        issues = outcome.summary.issues.len(),
        calls = outcome.summary.fetch.calls,
        rate_limited = outcome.summary.fetch.rate_limited,
        "SHARPLINE finished"
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sharpline=info"));

    let json_logging = std::env::var("SHARPLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
