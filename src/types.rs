//! Shared types for SHARPLINE.
//!
//! These types form the data model used across all modules: the upstream
//! wire shapes we consume, normalised quotes and their identity, reference
//! bookmaker mappings, and the issues a run can report. They are kept free
//! of behaviour that depends on other modules so that provider, aggregate
//! and engine code can all depend on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// One side of a two-way proposition.
///
/// The named variants form the closed set whose complement is defined.
/// Anything else is carried as `Other` and can never be paired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Over,
    Under,
    Yes,
    No,
    Other(String),
}

impl Side {
    /// Parse a provider outcome name (case and surrounding whitespace ignored).
    pub fn parse(name: &str) -> Self {
        let normalised = normalise_label(name);
        match normalised.as_str() {
            "over" => Side::Over,
            "under" => Side::Under,
            "yes" => Side::Yes,
            "no" => Side::No,
            _ => Side::Other(normalised),
        }
    }

    /// The opposing side, if this side belongs to a known pairing.
    pub fn complement(&self) -> Option<Side> {
        match self {
            Side::Over => Some(Side::Under),
            Side::Under => Some(Side::Over),
            Side::Yes => Some(Side::No),
            Side::No => Some(Side::Yes),
            Side::Other(_) => None,
        }
    }

    /// Over and Yes lead a pair; their complements follow.
    pub fn is_primary(&self) -> bool {
        matches!(self, Side::Over | Side::Yes)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Side::Over => "over",
            Side::Under => "under",
            Side::Yes => "yes",
            Side::No => "no",
            Side::Other(name) => name,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case and trim a provider label.
pub fn normalise_label(label: &str) -> String {
    label.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// A proposition's point/handicap, stored in thousandths so that it has
/// exact equality and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Line(i64);

impl Line {
    const SCALE: f64 = 1000.0;

    /// Build a line from a provider point value. Non-finite points are rejected.
    pub fn from_point(point: f64) -> Option<Self> {
        if !point.is_finite() {
            return None;
        }
        Some(Line((point * Self::SCALE).round() as i64))
    }

    pub fn point(&self) -> f64 {
        self.0 as f64 / Self::SCALE
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.point())
    }
}

// ---------------------------------------------------------------------------
// OutcomeKey
// ---------------------------------------------------------------------------

/// Identity of a betting proposition, independent of side, bookmaker and price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeKey {
    event_id: String,
    description: String,
    line: Option<Line>,
}

impl OutcomeKey {
    /// The description is normalised, so keys built from differently
    /// cased provider labels compare equal.
    pub fn new(event_id: impl Into<String>, description: &str, line: Option<Line>) -> Self {
        Self {
            event_id: event_id.into(),
            description: normalise_label(description),
            line,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn line(&self) -> Option<Line> {
        self.line
    }
}

impl fmt::Display for OutcomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}/{}@{}", self.event_id, self.description, line),
            None => write!(f, "{}/{}", self.event_id, self.description),
        }
    }
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// One bookmaker's decimal price for one side of one proposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub event_id: String,
    pub market_key: String,
    pub bookmaker: String,
    pub side: Side,
    pub description: String,
    pub line: Option<Line>,
    /// Decimal odds, always > 1.0.
    pub price: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl Quote {
    /// Normalise a raw provider outcome into a quote.
    pub fn from_raw(
        raw: &RawOutcome,
        event_id: &str,
        market_key: &str,
        bookmaker: &str,
        last_update: Option<DateTime<Utc>>,
    ) -> Result<Self, QuoteError> {
        let price = raw.price.ok_or_else(|| QuoteError::MissingPrice {
            outcome: raw.name.clone(),
        })?;
        if !price.is_finite() || price <= 1.0 {
            return Err(QuoteError::InvalidPrice {
                outcome: raw.name.clone(),
                price,
            });
        }

        let line = match raw.point {
            Some(point) => Some(Line::from_point(point).ok_or(QuoteError::InvalidLine {
                outcome: raw.name.clone(),
            })?),
            None => None,
        };

        Ok(Self {
            event_id: event_id.to_string(),
            market_key: market_key.to_string(),
            bookmaker: bookmaker.to_string(),
            side: Side::parse(&raw.name),
            description: normalise_label(raw.description.as_deref().unwrap_or("")),
            line,
            price,
            last_update,
        })
    }

    pub fn key(&self) -> OutcomeKey {
        OutcomeKey::new(self.event_id.clone(), &self.description, self.line)
    }

    /// Raw implied probability including the bookmaker's margin.
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.price
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {:.3} ({})",
            self.bookmaker,
            self.key(),
            self.side,
            self.price,
            self.market_key,
        )
    }
}

// ---------------------------------------------------------------------------
// Provider wire types (The Odds API v4)
// ---------------------------------------------------------------------------

/// One event with its bookmaker odds, as returned both by the per-sport
/// game listing and by the per-event odds endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOdds {
    pub id: String,
    #[serde(default)]
    pub sport_key: String,
    #[serde(default)]
    pub home_team: Option<String>,
    #[serde(default)]
    pub away_team: Option<String>,
    #[serde(default)]
    pub commence_time: Option<DateTime<Utc>>,
    /// `None` when the provider omitted the list entirely.
    #[serde(default)]
    pub bookmakers: Option<Vec<BookmakerOdds>>,
}

impl EventOdds {
    /// Keys of all bookmakers present in this payload.
    pub fn bookmaker_keys(&self) -> Vec<&str> {
        self.bookmakers
            .iter()
            .flatten()
            .map(|b| b.key.as_str())
            .collect()
    }

    /// Drop bookmaker entries that carry no market data.
    pub fn retain_bookmakers_with_markets(&mut self) {
        if let Some(books) = self.bookmakers.as_mut() {
            books.retain(|b| !b.markets.is_empty());
        }
    }

    pub fn has_market_data(&self) -> bool {
        self.bookmakers
            .iter()
            .flatten()
            .any(|b| !b.markets.is_empty())
    }

    /// Human-readable matchup for logs.
    pub fn matchup(&self) -> String {
        match (&self.home_team, &self.away_team) {
            (Some(home), Some(away)) => format!("{away} @ {home}"),
            _ => self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmakerOdds {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: Vec<MarketOdds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    /// Market key, e.g. "player_threes". Missing keys make the entry malformed.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub point: Option<f64>,
}

/// Items flowing through the ingestion queue.
#[derive(Debug, Clone)]
pub enum IngestMessage {
    Payload(EventOdds),
    /// End of input. Enqueued exactly once, after every game task settled.
    Done,
}

// ---------------------------------------------------------------------------
// Reference bookmakers
// ---------------------------------------------------------------------------

/// Which bookmakers are treated as sharp for each market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceBooks {
    default: Vec<String>,
    per_market: HashMap<String, Vec<String>>,
}

impl ReferenceBooks {
    pub fn new(default: Vec<String>, per_market: HashMap<String, Vec<String>>) -> Self {
        Self { default, per_market }
    }

    /// Reference bookmakers for a market, falling back to the default list.
    pub fn for_market(&self, market_key: &str) -> &[String] {
        self.per_market
            .get(market_key)
            .map(Vec::as_slice)
            .unwrap_or(&self.default)
    }

    pub fn is_reference(&self, market_key: &str, bookmaker: &str) -> bool {
        self.for_market(market_key).iter().any(|b| b == bookmaker)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a raw outcome could not become a quote.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuoteError {
    #[error("Outcome '{outcome}' has no price")]
    MissingPrice { outcome: String },

    #[error("Outcome '{outcome}' has invalid decimal price {price}")]
    InvalidPrice { outcome: String, price: f64 },

    #[error("Outcome '{outcome}' has a non-finite point")]
    InvalidLine { outcome: String },
}

/// Failure of a single provider fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Rate limited on every credential; gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Something dropped or flagged during a run. None of these abort the run;
/// they are collected so that dropped games and payloads are enumerable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RunIssue {
    #[error("Game {game_id} not fetched for market {market}: {reason}")]
    Ineligible {
        game_id: String,
        market: String,
        reason: String,
    },

    #[error("Fetch failed for game {game_id}: {error}")]
    Fetch { game_id: String, error: FetchError },

    #[error("Game {game_id} timed out after {timeout_ms}ms")]
    Timeout { game_id: String, timeout_ms: u64 },

    #[error("Game task failed: {detail}")]
    TaskFailed { detail: String },

    #[error("Malformed payload for event {event_id}: {detail}")]
    MalformedPayload { event_id: String, detail: String },

    #[error("Payload for event {event_id} has none of the expected bookmakers (found: {found:?})")]
    BookmakerMismatch { event_id: String, found: Vec<String> },

    #[error("Data integrity warning in market {market} (event {event_id}): {detail}")]
    DataIntegrity {
        market: String,
        event_id: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
