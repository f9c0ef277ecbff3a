//! Per-market quote storage, outcome pairing and consensus maintenance.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::consensus::{ConsensusEntry, Contribution, ContributionUpdate};
use crate::devig::DevigMethod;
use crate::types::{MarketOdds, OutcomeKey, Quote, Side};

/// bookmaker -> outcome key -> side -> quote.
pub type BookmakerQuoteTable = BTreeMap<String, BTreeMap<OutcomeKey, BTreeMap<Side, Quote>>>;

/// What one `Market::ingest` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Quotes stored or replaced with a different value.
    pub stored: usize,
    /// Quotes identical to what was already stored.
    pub unchanged: usize,
    /// Raw outcomes that could not become quotes.
    pub rejected: usize,
    pub consensus_created: usize,
    pub consensus_updated: usize,
    /// Non-reference quotes that now have a consensus to compare against.
    pub comparable: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The bookmaker sent an empty outcome list for this market.
    NoData,
    Applied(IngestSummary),
}

/// A non-reference quote next to the consensus for the same side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub quote: Quote,
    pub fair_probability: f64,
    pub implied_probability: f64,
    pub books_used: usize,
}

/// Plain-data view of a market for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub key: String,
    pub reference_books: Vec<String>,
    pub bookmakers: Vec<String>,
    pub has_enough_data: bool,
    pub events_compared: usize,
    pub consensus: Vec<ConsensusEntry>,
    pub quotes: Vec<Quote>,
}

#[derive(Debug)]
pub struct Market {
    key: String,
    reference_books: Vec<String>,
    min_bookmakers: usize,
    devig: DevigMethod,
    quotes: BookmakerQuoteTable,
    consensus: BTreeMap<OutcomeKey, ConsensusEntry>,
    events_compared: BTreeSet<String>,
    ingest_count: u64,
}

impl Market {
    pub fn new(
        key: impl Into<String>,
        reference_books: Vec<String>,
        min_bookmakers: usize,
        devig: DevigMethod,
    ) -> Self {
        Self {
            key: key.into(),
            reference_books,
            min_bookmakers,
            devig,
            quotes: BTreeMap::new(),
            consensus: BTreeMap::new(),
            events_compared: BTreeSet::new(),
            ingest_count: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Ingest one bookmaker's outcome list for one event.
    pub fn ingest(&mut self, bookmaker: &str, event_id: &str, update: &MarketOdds) -> IngestOutcome {
        if update.outcomes.is_empty() {
            debug!(market = %self.key, bookmaker, event_id, "No outcomes in market update");
            return IngestOutcome::NoData;
        }

        let mut summary = IngestSummary::default();
        let mut touched: BTreeSet<OutcomeKey> = BTreeSet::new();

        for raw in &update.outcomes {
            let quote = match Quote::from_raw(raw, event_id, &self.key, bookmaker, update.last_update) {
                Ok(q) => q,
                Err(e) => {
                    warn!(market = %self.key, bookmaker, event_id, error = %e, "Skipping outcome");
                    summary.rejected += 1;
                    continue;
                }
            };

            let key = quote.key();
            let sides = self
                .quotes
                .entry(bookmaker.to_string())
                .or_default()
                .entry(key.clone())
                .or_default();

            if sides.get(&quote.side) == Some(&quote) {
                summary.unchanged += 1;
                continue;
            }
            sides.insert(quote.side.clone(), quote);
            summary.stored += 1;
            touched.insert(key);
        }

        if self.is_reference(bookmaker) {
            for key in &touched {
                match self.update_consensus(bookmaker, key) {
                    Some(ContributionUpdate::Added) if self.consensus[key].books_used().len() == 1 => {
                        summary.consensus_created += 1
                    }
                    Some(ContributionUpdate::Added | ContributionUpdate::Replaced) => {
                        summary.consensus_updated += 1
                    }
                    _ => {}
                }
            }
        } else {
            for key in &touched {
                if let Some(entry) = self.consensus.get(key) {
                    debug!(
                        market = %self.key,
                        bookmaker,
                        outcome = %key,
                        books_used = entry.books_used().len(),
                        "Quote comparable against consensus"
                    );
                    summary.comparable += 1;
                }
            }
        }

        if self.consensus.keys().any(|k| k.event_id() == event_id) {
            self.events_compared.insert(event_id.to_string());
        }
        self.ingest_count += 1;

        IngestOutcome::Applied(summary)
    }

    /// Devig this bookmaker's pair for `key`, if it has one, and fold it
    /// into the consensus.
    fn update_consensus(&mut self, bookmaker: &str, key: &OutcomeKey) -> Option<ContributionUpdate> {
        let (primary, secondary) = self
            .quotes
            .get(bookmaker)
            .and_then(|keys| keys.get(key))
            .and_then(matched_pair)?;

        let fair = match self.devig.devig(primary.price, secondary.price) {
            Ok(fair) => fair,
            Err(e) => {
                warn!(market = %self.key, bookmaker, outcome = %key, error = %e, "Devig failed");
                return None;
            }
        };
        let contribution = Contribution::new(fair, primary.clone(), secondary.clone());

        match self.consensus.get_mut(key) {
            Some(entry) => {
                if !entry.accepts(&primary.side, &secondary.side) {
                    warn!(
                        market = %self.key,
                        bookmaker,
                        outcome = %key,
                        "Pair sides differ from existing consensus, ignoring"
                    );
                    return None;
                }
                let update = entry.apply(contribution);
                debug!(
                    market = %self.key,
                    bookmaker,
                    outcome = %key,
                    ?update,
                    fair = entry.fair().first,
                    books_used = entry.books_used().len(),
                    "Consensus updated"
                );
                Some(update)
            }
            None => {
                debug!(market = %self.key, bookmaker, outcome = %key, fair = fair.first, "Consensus created");
                self.consensus
                    .insert(key.clone(), ConsensusEntry::new(key.clone(), contribution));
                Some(ContributionUpdate::Added)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_reference(&self, bookmaker: &str) -> bool {
        self.reference_books.iter().any(|b| b == bookmaker)
    }

    pub fn reference_books(&self) -> &[String] {
        &self.reference_books
    }

    pub fn quote_table(&self) -> &BookmakerQuoteTable {
        &self.quotes
    }

    pub fn quote(&self, bookmaker: &str, key: &OutcomeKey, side: &Side) -> Option<&Quote> {
        self.quotes.get(bookmaker)?.get(key)?.get(side)
    }

    pub fn consensus(&self) -> &BTreeMap<OutcomeKey, ConsensusEntry> {
        &self.consensus
    }

    pub fn consensus_for(&self, key: &OutcomeKey) -> Option<&ConsensusEntry> {
        self.consensus.get(key)
    }

    /// Bookmakers holding at least one quote in this market.
    pub fn bookmakers(&self) -> BTreeSet<&str> {
        self.quotes.keys().map(String::as_str).collect()
    }

    /// Bookmakers holding at least one quote for `event_id`.
    pub fn bookmakers_for_event(&self, event_id: &str) -> BTreeSet<&str> {
        self.quotes
            .iter()
            .filter(|(_, keys)| keys.keys().any(|k| k.event_id() == event_id))
            .map(|(book, _)| book.as_str())
            .collect()
    }

    /// Every event id referenced by a stored quote.
    pub fn event_ids(&self) -> BTreeSet<&str> {
        self.quotes
            .values()
            .flat_map(|keys| keys.keys().map(OutcomeKey::event_id))
            .collect()
    }

    pub fn has_enough_data(&self) -> bool {
        self.quotes.len() >= self.min_bookmakers
    }

    /// Events with at least one consensus entry.
    pub fn events_compared(&self) -> usize {
        self.events_compared.len()
    }

    pub fn ingest_count(&self) -> u64 {
        self.ingest_count
    }

    /// Non-reference quotes with a consensus for the same outcome and side.
    pub fn comparisons(&self) -> Vec<Comparison> {
        let mut out = Vec::new();
        for (bookmaker, keys) in &self.quotes {
            if self.is_reference(bookmaker) {
                continue;
            }
            for (key, sides) in keys {
                let Some(entry) = self.consensus.get(key) else {
                    continue;
                };
                for quote in sides.values() {
                    if let Some(fair_probability) = entry.probability(&quote.side) {
                        out.push(Comparison {
                            quote: quote.clone(),
                            fair_probability,
                            implied_probability: quote.implied_probability(),
                            books_used: entry.books_used().len(),
                        });
                    }
                }
            }
        }
        out
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            key: self.key.clone(),
            reference_books: self.reference_books.clone(),
            bookmakers: self.quotes.keys().cloned().collect(),
            has_enough_data: self.has_enough_data(),
            events_compared: self.events_compared(),
            consensus: self.consensus.values().cloned().collect(),
            quotes: self
                .quotes
                .values()
                .flat_map(|keys| keys.values())
                .flat_map(|sides| sides.values())
                .cloned()
                .collect(),
        }
    }
}

/// The (primary, complement) pair among one bookmaker's sides for a key.
fn matched_pair(sides: &BTreeMap<Side, Quote>) -> Option<(&Quote, &Quote)> {
    [Side::Over, Side::Yes].iter().find_map(|primary| {
        let complement = primary.complement()?;
        Some((sides.get(primary)?, sides.get(&complement)?))
    })
}
