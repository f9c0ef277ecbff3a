//! Scripted transport for integration testing.
//!
//! Serves canned responses per URL, in order, and records every request.
//! A URL with no remaining script gets a 404.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sharpline::provider::{HttpTransport, RawResponse};

pub const BASE_URL: &str = "https://odds.test";
pub const SPORT: &str = "basketball_nba";

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(RawResponse),
    /// Respond after the given delay.
    Delayed(Duration, RawResponse),
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Default, Clone)]
pub struct MockTransport {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, response: Scripted) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn respond_json(&self, url: &str, body: &Value) -> &Self {
        self.script(url, Scripted::Respond(ok(body)))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            query: query.to_vec(),
        });

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::Respond(resp)) => Ok(resp),
            Some(Scripted::Delayed(delay, resp)) => {
                tokio::time::sleep(delay).await;
                Ok(resp)
            }
            Some(Scripted::Fail(msg)) => Err(anyhow!(msg)),
            None => Ok(RawResponse {
                status: 404,
                body: json!({"message": format!("no script for {url}")}).to_string(),
                ..Default::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

pub fn ok(body: &Value) -> RawResponse {
    RawResponse {
        status: 200,
        body: body.to_string(),
        requests_remaining: Some(400),
        requests_used: Some(100),
    }
}

pub fn rate_limited() -> RawResponse {
    RawResponse {
        status: 429,
        body: json!({"message": "Too many requests"}).to_string(),
        ..Default::default()
    }
}

pub fn games_url() -> String {
    format!("{BASE_URL}/v4/sports/{SPORT}/odds")
}

pub fn event_url(event_id: &str) -> String {
    format!("{BASE_URL}/v4/sports/{SPORT}/events/{event_id}/odds")
}

/// A game listing entry naming which bookmakers carry the game.
pub fn listed_game(id: &str, bookmakers: &[&str]) -> Value {
    json!({
        "id": id,
        "sport_key": SPORT,
        "home_team": "Golden State Warriors",
        "away_team": "Boston Celtics",
        "commence_time": "2024-03-01T03:00:00Z",
        "bookmakers": bookmakers.iter().map(|b| json!({
            "key": b,
            "title": b,
            "markets": [{"key": "h2h", "outcomes": []}]
        })).collect::<Vec<_>>()
    })
}

/// One bookmaker's over/under pair for a player in one market.
pub fn over_under(bookmaker: &str, market: &str, player: &str, point: f64, over: f64, under: f64) -> Value {
    json!({
        "key": bookmaker,
        "title": bookmaker,
        "last_update": "2024-02-29T20:00:00Z",
        "markets": [{
            "key": market,
            "last_update": "2024-02-29T20:00:00Z",
            "outcomes": [
                {"name": "Over", "description": player, "price": over, "point": point},
                {"name": "Under", "description": player, "price": under, "point": point}
            ]
        }]
    })
}

pub fn event_odds(id: &str, bookmakers: Vec<Value>) -> Value {
    json!({
        "id": id,
        "sport_key": SPORT,
        "home_team": "Golden State Warriors",
        "away_team": "Boston Celtics",
        "commence_time": "2024-03-01T03:00:00Z",
        "bookmakers": bookmakers
    })
}
