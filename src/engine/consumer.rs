//! Aggregation consumer.
//!
//! Drains the ingestion queue on a single task and is the only writer of
//! `Market` state. Each payload is routed per bookmaker and market entry to
//! the owning `Market`, then checked for consistency. Integrity problems are
//! reported and never rolled back.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregate::{IngestOutcome, Market};
use crate::devig::DevigMethod;
use crate::types::{EventOdds, IngestMessage, ReferenceBooks, RunIssue};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Bookmakers the run requested; payloads with none of them are skipped.
    pub expected_bookmakers: Vec<String>,
    /// Ids of the games listed for the run; quotes for any other event are
    /// flagged.
    pub known_events: BTreeSet<String>,
    pub reference_books: ReferenceBooks,
    pub min_bookmakers: usize,
    pub devig: DevigMethod,
}

/// Final state handed back once the queue is drained.
pub struct ConsumerReport {
    pub markets: BTreeMap<String, Market>,
    pub payloads_ingested: usize,
    pub payloads_rejected: usize,
    pub issues: Vec<RunIssue>,
    /// False when the queue closed without an end-of-input marker.
    pub saw_sentinel: bool,
}

pub struct AggregationConsumer {
    settings: ConsumerSettings,
    markets: BTreeMap<String, Market>,
    /// Bookmakers advertised for each (market, event) across accepted payloads.
    advertised: BTreeMap<(String, String), BTreeSet<String>>,
    payloads_ingested: usize,
    payloads_rejected: usize,
    issues: Vec<RunIssue>,
}

impl AggregationConsumer {
    pub fn new(settings: ConsumerSettings) -> Self {
        Self {
            settings,
            markets: BTreeMap::new(),
            advertised: BTreeMap::new(),
            payloads_ingested: 0,
            payloads_rejected: 0,
            issues: Vec::new(),
        }
    }

    /// Consume until `Done` (or until every sender is gone).
    pub async fn run(mut self, mut queue: mpsc::Receiver<IngestMessage>) -> ConsumerReport {
        let mut saw_sentinel = false;
        while let Some(message) = queue.recv().await {
            match message {
                IngestMessage::Payload(event) => {
                    self.process(event);
                }
                IngestMessage::Done => {
                    saw_sentinel = true;
                    break;
                }
            }
        }
        if !saw_sentinel {
            warn!("Ingestion queue closed without end-of-input marker");
        }

        info!(
            markets = self.markets.len(),
            ingested = self.payloads_ingested,
            rejected = self.payloads_rejected,
            issues = self.issues.len(),
            "Aggregation complete"
        );

        ConsumerReport {
            markets: self.markets,
            payloads_ingested: self.payloads_ingested,
            payloads_rejected: self.payloads_rejected,
            issues: self.issues,
            saw_sentinel,
        }
    }

    /// Apply one payload. Returns false when the payload was rejected.
    pub fn process(&mut self, event: EventOdds) -> bool {
        let Some(bookmakers) = event.bookmakers.as_ref() else {
            self.reject(RunIssue::MalformedPayload {
                event_id: event.id.clone(),
                detail: "missing bookmaker list".to_string(),
            });
            return false;
        };

        let expected = &self.settings.expected_bookmakers;
        if !bookmakers.iter().any(|b| expected.contains(&b.key)) {
            self.reject(RunIssue::BookmakerMismatch {
                event_id: event.id.clone(),
                found: bookmakers.iter().map(|b| b.key.clone()).collect(),
            });
            return false;
        }

        let mut touched_markets: BTreeSet<String> = BTreeSet::new();

        for bookmaker in bookmakers {
            for market_odds in &bookmaker.markets {
                let Some(market_key) = market_odds.key.as_deref() else {
                    self.report(RunIssue::MalformedPayload {
                        event_id: event.id.clone(),
                        detail: format!("market entry without key from {}", bookmaker.key),
                    });
                    continue;
                };

                self.advertised
                    .entry((market_key.to_string(), event.id.clone()))
                    .or_default()
                    .insert(bookmaker.key.clone());
                touched_markets.insert(market_key.to_string());

                let market = self.market_mut(market_key);
                match market.ingest(&bookmaker.key, &event.id, market_odds) {
                    IngestOutcome::NoData => {
                        debug!(event_id = %event.id, bookmaker = %bookmaker.key, market = market_key, "No data");
                    }
                    IngestOutcome::Applied(summary) => {
                        debug!(
                            event_id = %event.id,
                            bookmaker = %bookmaker.key,
                            market = market_key,
                            stored = summary.stored,
                            rejected = summary.rejected,
                            consensus_created = summary.consensus_created,
                            consensus_updated = summary.consensus_updated,
                            comparable = summary.comparable,
                            "Ingested market update"
                        );
                    }
                }
            }
        }

        for market_key in &touched_markets {
            self.validate(market_key, &event.id);
        }

        self.payloads_ingested += 1;
        true
    }

    /// Resolve the market for `key`, creating it on first reference.
    fn market_mut(&mut self, key: &str) -> &mut Market {
        let settings = &self.settings;
        self.markets.entry(key.to_string()).or_insert_with(|| {
            info!(market = key, "Creating market");
            Market::new(
                key,
                settings.reference_books.for_market(key).to_vec(),
                settings.min_bookmakers,
                settings.devig,
            )
        })
    }

    /// Compare market state against what accepted payloads advertised.
    fn validate(&mut self, market_key: &str, event_id: &str) {
        let Some(market) = self.markets.get(market_key) else {
            return;
        };
        let mut problems = Vec::new();

        let recorded: BTreeSet<&str> = market.bookmakers_for_event(event_id);
        let advertised: BTreeSet<&str> = self
            .advertised
            .get(&(market_key.to_string(), event_id.to_string()))
            .map(|books| books.iter().map(String::as_str).collect())
            .unwrap_or_default();
        if recorded != advertised {
            problems.push(format!(
                "bookmakers recorded {recorded:?} differ from advertised {advertised:?}"
            ));
        }

        let unknown: Vec<&str> = market
            .event_ids()
            .into_iter()
            .filter(|id| !self.settings.known_events.contains(*id))
            .collect();
        if !unknown.is_empty() {
            problems.push(format!("quotes reference unknown events {unknown:?}"));
        }

        for detail in problems {
            self.report(RunIssue::DataIntegrity {
                market: market_key.to_string(),
                event_id: event_id.to_string(),
                detail,
            });
        }
    }

    fn reject(&mut self, issue: RunIssue) {
        self.payloads_rejected += 1;
        self.report(issue);
    }

    fn report(&mut self, issue: RunIssue) {
        warn!(issue = %issue, "Payload issue");
        self.issues.push(issue);
    }

    pub fn markets(&self) -> &BTreeMap<String, Market> {
        &self.markets
    }

    pub fn issues(&self) -> &[RunIssue] {
        &self.issues
    }
}
