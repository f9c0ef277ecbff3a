//! One aggregation run, end to end.
//!
//! Lists the sport's games, then runs the ingestion scheduler and the
//! aggregation consumer concurrently over one bounded queue. Only a failed
//! game listing aborts the run; everything else is collected as a
//! `RunIssue` in the summary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::consumer::{AggregationConsumer, ConsumerSettings};
use super::scheduler::{IngestionScheduler, SchedulerSettings};
use crate::aggregate::Market;
use crate::config::AppConfig;
use crate::devig::DevigMethod;
use crate::provider::{FetchStatsSnapshot, OddsFetcher};
use crate::types::{EventOdds, ReferenceBooks, RunIssue};

/// In-memory parameters for a run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub sport: String,
    /// Full request list, reference bookmakers included.
    pub bookmakers: Vec<String>,
    pub markets: Vec<String>,
    pub min_bookmakers: usize,
    pub devig: DevigMethod,
    pub reference_books: ReferenceBooks,
    pub scheduler: SchedulerSettings,
    pub queue_capacity: usize,
}

impl RunParams {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sport: config.run.sport.clone(),
            bookmakers: config.all_bookmakers(),
            markets: config.run.markets.clone(),
            min_bookmakers: config.min_bookmakers(),
            devig: config.run.devig_method,
            reference_books: config.reference_books(),
            scheduler: SchedulerSettings::from(&config.scheduler),
            queue_capacity: config.scheduler.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub sport: String,
    pub devig_method: DevigMethod,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub games_listed: usize,
    pub games_eligible: usize,
    pub games_fetched: usize,
    pub games_timed_out: usize,
    pub payloads_enqueued: usize,
    pub payloads_ingested: usize,
    pub payloads_rejected: usize,
    pub markets: usize,
    pub consensus_entries: usize,
    pub fetch: FetchStatsSnapshot,
    /// Wall time minus time spent in rate-limit backoff.
    pub runtime_excluding_delay_ms: u64,
    pub issues: Vec<RunIssue>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub markets: BTreeMap<String, Market>,
}

pub struct AggregationRun {
    fetcher: Arc<OddsFetcher>,
    params: RunParams,
}

impl AggregationRun {
    pub fn new(fetcher: Arc<OddsFetcher>, params: RunParams) -> Self {
        Self { fetcher, params }
    }

    /// List games and aggregate them.
    pub async fn execute(&self) -> Result<RunOutcome> {
        let games = self
            .fetcher
            .fetch_games(&self.params.sport, &self.params.bookmakers)
            .await
            .with_context(|| format!("Failed to fetch game list for {}", self.params.sport))?;

        info!(sport = %self.params.sport, games = games.len(), "Fetched game list");
        Ok(self.execute_games(games).await)
    }

    /// Aggregate an already-listed set of games.
    pub async fn execute_games(&self, games: Vec<EventOdds>) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let delay_before = self.fetcher.stats().total_delay();

        info!(
            %run_id,
            sport = %self.params.sport,
            games = games.len(),
            bookmakers = self.params.bookmakers.len(),
            markets = self.params.markets.len(),
            devig = %self.params.devig,
            "Starting aggregation run"
        );

        let (tx, rx) = mpsc::channel(self.params.queue_capacity.max(1));

        let consumer = AggregationConsumer::new(ConsumerSettings {
            expected_bookmakers: self.params.bookmakers.clone(),
            known_events: games.iter().map(|g| g.id.clone()).collect(),
            reference_books: self.params.reference_books.clone(),
            min_bookmakers: self.params.min_bookmakers,
            devig: self.params.devig,
        });
        let scheduler = IngestionScheduler::new(
            Arc::clone(&self.fetcher),
            Arc::new(self.params.reference_books.clone()),
            self.params.scheduler.clone(),
        );

        let (scheduled, consumed) = tokio::join!(
            scheduler.run(
                &self.params.sport,
                &games,
                &self.params.bookmakers,
                &self.params.markets,
                tx,
            ),
            consumer.run(rx),
        );

        if !consumed.saw_sentinel {
            warn!(%run_id, "Consumer finished without end-of-input marker");
        }

        let delay = self.fetcher.stats().total_delay().saturating_sub(delay_before);
        let runtime = clock.elapsed().saturating_sub(delay);

        let mut issues = scheduled.issues;
        issues.extend(consumed.issues);

        let summary = RunSummary {
            run_id,
            sport: self.params.sport.clone(),
            devig_method: self.params.devig,
            started_at,
            finished_at: Utc::now(),
            games_listed: scheduled.games_listed,
            games_eligible: scheduled.games_eligible,
            games_fetched: scheduled.games_fetched,
            games_timed_out: scheduled.games_timed_out,
            payloads_enqueued: scheduled.payloads_enqueued,
            payloads_ingested: consumed.payloads_ingested,
            payloads_rejected: consumed.payloads_rejected,
            markets: consumed.markets.len(),
            consensus_entries: consumed.markets.values().map(|m| m.consensus().len()).sum(),
            fetch: self.fetcher.stats().snapshot(),
            runtime_excluding_delay_ms: runtime.as_millis() as u64,
            issues,
        };

        info!(
            %run_id,
            markets = summary.markets,
            consensus_entries = summary.consensus_entries,
            payloads = summary.payloads_ingested,
            issues = summary.issues.len(),
            calls = summary.fetch.calls,
            runtime_ms = summary.runtime_excluding_delay_ms,
            "Aggregation run finished"
        );

        RunOutcome {
            summary,
            markets: consumed.markets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_config() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [run]
            sport = "basketball_nba"
            bookmakers = ["betmgm"]
            markets = ["player_threes"]
            devig_method = "additive"

            [provider]
            api_key_envs = ["ODDS_API_KEY_1"]

            [scheduler]
            game_timeout_secs = 5
            queue_capacity = 32

            [reference_books.markets]
            player_threes = ["fliff", "espnbet"]
            "#,
        )
        .unwrap();

        let params = RunParams::from_config(&cfg);
        assert_eq!(params.bookmakers, vec!["betmgm", "fliff", "espnbet"]);
        assert_eq!(params.min_bookmakers, 3);
        assert_eq!(params.devig, DevigMethod::Additive);
        assert_eq!(params.scheduler.game_timeout, std::time::Duration::from_secs(5));
        assert_eq!(params.queue_capacity, 32);
        assert!(params.reference_books.is_reference("player_threes", "fliff"));
    }
}
