//! Ingestion scheduler.
//!
//! Fans out one fetch task per eligible game, bounded by a semaphore and a
//! per-game deadline. Each task issues its batched requests concurrently and
//! collects the payloads in completion order; only a game that finished
//! within its deadline has its payloads pushed onto the ingestion queue.
//! Once every game task has settled, exactly one `IngestMessage::Done` is
//! enqueued.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::provider::{plan_batches, BatchRequest, OddsFetcher};
use crate::types::{EventOdds, IngestMessage, ReferenceBooks, RunIssue};

// ---------------------------------------------------------------------------
// Settings & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub game_timeout: Duration,
    pub max_concurrent_games: usize,
    pub batch_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            game_timeout: Duration::from_secs(10),
            max_concurrent_games: 8,
            batch_size: crate::provider::odds_api::MAX_BATCH_SIZE,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            game_timeout: Duration::from_secs(config.game_timeout_secs),
            max_concurrent_games: config.max_concurrent_games,
            batch_size: config.batch_size,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    pub games_listed: usize,
    pub games_eligible: usize,
    /// Eligible games whose task finished before its deadline.
    pub games_fetched: usize,
    pub games_timed_out: usize,
    pub payloads_enqueued: usize,
    pub issues: Vec<RunIssue>,
}

/// Requests planned for one eligible game.
#[derive(Debug, Clone, PartialEq)]
pub struct GamePlan {
    pub game_id: String,
    pub sport: String,
    pub markets: Vec<String>,
    pub batches: Vec<BatchRequest>,
}

#[derive(Debug)]
struct GameOutcome {
    game_id: String,
    payloads: usize,
    timed_out: bool,
    issues: Vec<RunIssue>,
}

/// Everything one game's batches produced, before anything is enqueued.
#[derive(Debug, Default)]
struct GameFetch {
    payloads: Vec<EventOdds>,
    issues: Vec<RunIssue>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct IngestionScheduler {
    fetcher: Arc<OddsFetcher>,
    reference_books: Arc<ReferenceBooks>,
    settings: SchedulerSettings,
}

impl IngestionScheduler {
    pub fn new(fetcher: Arc<OddsFetcher>, reference_books: Arc<ReferenceBooks>, settings: SchedulerSettings) -> Self {
        Self {
            fetcher,
            reference_books,
            settings,
        }
    }

    /// Decide which markets are worth fetching for `game`.
    ///
    /// A market qualifies when the game's known bookmakers include at least
    /// one requested reference bookmaker and at least one requested
    /// non-reference bookmaker for it.
    pub fn plan_game(
        &self,
        sport: &str,
        game: &EventOdds,
        bookmakers: &[String],
        markets: &[String],
    ) -> (Option<GamePlan>, Vec<RunIssue>) {
        let known = game.bookmaker_keys();
        let mut issues = Vec::new();

        if known.is_empty() {
            issues.push(RunIssue::Ineligible {
                game_id: game.id.clone(),
                market: "*".to_string(),
                reason: "no bookmakers listed for game".to_string(),
            });
            return (None, issues);
        }

        let available: Vec<&String> = bookmakers
            .iter()
            .filter(|b| known.contains(&b.as_str()))
            .collect();

        let mut eligible = Vec::new();
        for market in markets {
            let refs = self.reference_books.for_market(market);
            let has_reference = available.iter().any(|b| refs.contains(*b));
            let has_other = available.iter().any(|b| !refs.contains(*b));

            if has_reference && has_other {
                eligible.push(market.clone());
                continue;
            }

            let reason = match (has_reference, has_other) {
                (false, false) => "no requested bookmakers listed",
                (false, true) => "no reference bookmaker listed",
                _ => "only reference bookmakers listed",
            };
            debug!(game_id = %game.id, market = %market, reason, "Market not eligible");
            issues.push(RunIssue::Ineligible {
                game_id: game.id.clone(),
                market: market.clone(),
                reason: reason.to_string(),
            });
        }

        if eligible.is_empty() {
            return (None, issues);
        }

        let batches = plan_batches(bookmakers, &eligible, self.settings.batch_size);
        let plan = GamePlan {
            game_id: game.id.clone(),
            sport: sport.to_string(),
            markets: eligible,
            batches,
        };
        (Some(plan), issues)
    }

    /// Fetch every eligible game and feed payloads into `queue`.
    pub async fn run(
        &self,
        sport: &str,
        games: &[EventOdds],
        bookmakers: &[String],
        markets: &[String],
        queue: mpsc::Sender<IngestMessage>,
    ) -> SchedulerReport {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_games.max(1)));
        let mut tasks = JoinSet::new();
        let mut report = SchedulerReport {
            games_listed: games.len(),
            ..Default::default()
        };

        for game in games {
            let (plan, issues) = self.plan_game(sport, game, bookmakers, markets);
            report.issues.extend(issues);
            let Some(plan) = plan else {
                info!(game_id = %game.id, matchup = %game.matchup(), "Skipping game: no eligible markets");
                continue;
            };
            report.games_eligible += 1;

            debug!(
                game_id = %plan.game_id,
                markets = plan.markets.len(),
                batches = plan.batches.len(),
                "Scheduling game"
            );

            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let queue = queue.clone();
            let deadline = self.settings.game_timeout;

            tasks.spawn(async move {
                // The deadline covers fetching only, not the wait for a slot.
                let _permit = semaphore.acquire_owned().await;
                let fetched = match tokio::time::timeout(deadline, fetch_game(&fetcher, &plan)).await {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        return GameOutcome {
                            game_id: plan.game_id.clone(),
                            payloads: 0,
                            timed_out: true,
                            issues: vec![RunIssue::Timeout {
                                game_id: plan.game_id.clone(),
                                timeout_ms: deadline.as_millis() as u64,
                            }],
                        };
                    }
                };

                let mut payloads = 0;
                for event in fetched.payloads {
                    if queue.send(IngestMessage::Payload(event)).await.is_err() {
                        warn!(game_id = %plan.game_id, "Ingestion queue closed, abandoning game");
                        break;
                    }
                    payloads += 1;
                }
                GameOutcome {
                    game_id: plan.game_id.clone(),
                    payloads,
                    timed_out: false,
                    issues: fetched.issues,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.timed_out {
                        warn!(game_id = %outcome.game_id, "Game fetch timed out, dropping");
                        report.games_timed_out += 1;
                    } else {
                        report.games_fetched += 1;
                    }
                    report.payloads_enqueued += outcome.payloads;
                    report.issues.extend(outcome.issues);
                }
                Err(e) => {
                    warn!(error = %e, "Game task failed");
                    report.issues.push(RunIssue::TaskFailed { detail: e.to_string() });
                }
            }
        }

        if queue.send(IngestMessage::Done).await.is_err() {
            warn!("Ingestion queue closed before end-of-input was signalled");
        }

        info!(
            listed = report.games_listed,
            eligible = report.games_eligible,
            fetched = report.games_fetched,
            timed_out = report.games_timed_out,
            payloads = report.payloads_enqueued,
            "Ingestion scheduling complete"
        );
        report
    }
}

/// Issue all batches for one game concurrently and collect the non-empty
/// payloads in completion order.
async fn fetch_game(fetcher: &OddsFetcher, plan: &GamePlan) -> GameFetch {
    let mut fetched = GameFetch::default();

    let mut pending: FuturesUnordered<_> = plan
        .batches
        .iter()
        .map(|batch| fetcher.fetch_event_batch(&plan.sport, &plan.game_id, batch))
        .collect();

    while let Some(result) = pending.next().await {
        match result {
            Ok(mut event) => {
                event.retain_bookmakers_with_markets();
                if !event.has_market_data() {
                    debug!(game_id = %plan.game_id, "Empty payload dropped");
                    continue;
                }
                fetched.payloads.push(event);
            }
            Err(e) => {
                warn!(game_id = %plan.game_id, error = %e, "Batch fetch failed");
                fetched.issues.push(RunIssue::Fetch {
                    game_id: plan.game_id.clone(),
                    error: e,
                });
            }
        }
    }

    fetched
}
