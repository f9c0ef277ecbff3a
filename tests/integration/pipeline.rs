//! End-to-end aggregation runs against the scripted transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use sharpline::devig::{self, DevigMethod};
use sharpline::engine::{AggregationRun, RunParams, SchedulerSettings};
use sharpline::provider::odds_api::FetcherSettings;
use sharpline::provider::{CredentialSet, FetchStats, OddsFetcher};
use sharpline::types::{FetchError, Line, OutcomeKey, ReferenceBooks, RunIssue};

use crate::mock_transport::*;

const MARKET: &str = "player_threes";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn make_params(bookmakers: &[&str], refs: &[&str]) -> RunParams {
    let mut per_market = HashMap::new();
    per_market.insert(MARKET.to_string(), strings(refs));
    RunParams {
        sport: SPORT.to_string(),
        bookmakers: strings(bookmakers),
        markets: vec![MARKET.to_string()],
        min_bookmakers: bookmakers.len(),
        devig: DevigMethod::Power,
        reference_books: ReferenceBooks::new(strings(&["draftkings"]), per_market),
        scheduler: SchedulerSettings::default(),
        queue_capacity: 64,
    }
}

fn make_run(transport: &MockTransport, keys: usize, params: RunParams) -> (AggregationRun, Arc<FetchStats>) {
    let credentials = CredentialSet::new((0..keys).map(|i| format!("key-{i}")).collect()).unwrap();
    let stats = Arc::new(FetchStats::new());
    let fetcher = OddsFetcher::new(
        Arc::new(transport.clone()),
        Arc::new(credentials),
        Arc::clone(&stats),
        FetcherSettings {
            base_url: BASE_URL.to_string(),
            ..Default::default()
        },
    );
    (AggregationRun::new(Arc::new(fetcher), params), stats)
}

/// Two games, each priced by two reference books and one other book.
fn script_two_full_games(transport: &MockTransport) {
    let books = ["fliff", "espnbet", "betmgm"];
    transport.respond_json(
        &games_url(),
        &serde_json::json!([listed_game("g1", &books), listed_game("g2", &books)]),
    );
    transport.respond_json(
        &event_url("g1"),
        &event_odds(
            "g1",
            vec![
                over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95),
                over_under("espnbet", MARKET, "Stephen Curry", 4.5, 1.91, 1.91),
                over_under("betmgm", MARKET, "Stephen Curry", 4.5, 2.05, 1.77),
            ],
        ),
    );
    transport.respond_json(
        &event_url("g2"),
        &event_odds(
            "g2",
            vec![
                over_under("fliff", MARKET, "Jayson Tatum", 2.5, 2.10, 1.74),
                over_under("espnbet", MARKET, "Jayson Tatum", 2.5, 2.00, 1.83),
                over_under("betmgm", MARKET, "Jayson Tatum", 2.5, 1.95, 1.87),
            ],
        ),
    );
}

// -- End to end --

#[tokio::test]
async fn test_two_games_build_one_market_consensus() {
    let transport = MockTransport::new();
    script_two_full_games(&transport);
    let (run, stats) = make_run(&transport, 1, make_params(&["fliff", "espnbet", "betmgm"], &["fliff", "espnbet"]));

    let outcome = assert_ok!(run.execute().await);

    assert_eq!(outcome.markets.len(), 1);
    let market = &outcome.markets[MARKET];
    assert_eq!(market.consensus().len(), 2);
    for entry in market.consensus().values() {
        assert_eq!(entry.books_used().len(), 2);
        assert!((entry.fair().sum() - 1.0).abs() < 1e-9);
    }

    let curry = market
        .consensus_for(&OutcomeKey::new("g1", "stephen curry", Line::from_point(4.5)))
        .unwrap();
    let a = devig::power(1.87, 1.95).unwrap();
    let b = devig::power(1.91, 1.91).unwrap();
    assert!((curry.fair().first - (a.first + b.first) / 2.0).abs() < 1e-12);

    assert!(market.has_enough_data());
    assert_eq!(market.events_compared(), 2);
    assert_eq!(market.comparisons().len(), 4);

    let summary = &outcome.summary;
    assert_eq!(summary.games_listed, 2);
    assert_eq!(summary.games_fetched, 2);
    assert_eq!(summary.payloads_ingested, 2);
    assert_eq!(summary.consensus_entries, 2);
    assert!(summary.issues.is_empty(), "unexpected issues: {:?}", summary.issues);
    assert_eq!(stats.calls(), 3);
}

#[tokio::test]
async fn test_event_requests_carry_batch_parameters() {
    let transport = MockTransport::new();
    script_two_full_games(&transport);
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "espnbet", "betmgm"], &["fliff", "espnbet"]));

    assert_ok!(run.execute().await);

    let requests = transport.requests_to(&event_url("g1"));
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.param("markets"), Some(MARKET));
    assert_eq!(req.param("bookmakers"), Some("fliff,espnbet,betmgm"));
    assert_eq!(req.param("oddsFormat"), Some("decimal"));
    assert_eq!(req.param("dateFormat"), Some("iso"));
    assert_eq!(req.param("apiKey"), Some("key-0"));
}

// -- Eligibility --

#[tokio::test]
async fn test_game_with_only_reference_books_is_not_fetched() {
    let transport = MockTransport::new();
    transport.respond_json(
        &games_url(),
        &serde_json::json!([
            listed_game("g1", &["fliff", "espnbet"]),
            listed_game("g2", &["fliff", "betmgm"]),
        ]),
    );
    transport.respond_json(
        &event_url("g2"),
        &event_odds(
            "g2",
            vec![
                over_under("fliff", MARKET, "Jayson Tatum", 2.5, 2.10, 1.74),
                over_under("betmgm", MARKET, "Jayson Tatum", 2.5, 1.95, 1.87),
            ],
        ),
    );
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "espnbet", "betmgm"], &["fliff", "espnbet"]));

    let outcome = assert_ok!(run.execute().await);

    assert!(transport.requests_to(&event_url("g1")).is_empty());
    assert_eq!(outcome.summary.games_eligible, 1);
    assert!(outcome.summary.issues.iter().any(
        |i| matches!(i, RunIssue::Ineligible { game_id, market, .. } if game_id == "g1" && market == MARKET)
    ));
    assert_eq!(outcome.markets[MARKET].consensus().len(), 1);
}

// -- Failures --

#[tokio::test]
async fn test_game_list_failure_aborts_run() {
    let transport = MockTransport::new();
    transport.script(&games_url(), Scripted::Fail("dns failure".to_string()));
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "betmgm"], &["fliff"]));

    let err = assert_err!(run.execute().await);
    assert!(format!("{err:#}").contains("dns failure"));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_event_rotates_credentials() {
    let transport = MockTransport::new();
    transport.respond_json(&games_url(), &serde_json::json!([listed_game("g1", &["fliff", "betmgm"])]));
    transport
        .script(&event_url("g1"), Scripted::Respond(rate_limited()))
        .script(&event_url("g1"), Scripted::Respond(rate_limited()));
    transport.respond_json(
        &event_url("g1"),
        &event_odds(
            "g1",
            vec![
                over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95),
                over_under("betmgm", MARKET, "Stephen Curry", 4.5, 2.05, 1.77),
            ],
        ),
    );
    let mut params = make_params(&["fliff", "betmgm"], &["fliff"]);
    params.scheduler.game_timeout = Duration::from_secs(30);
    let (run, stats) = make_run(&transport, 3, params);

    let outcome = assert_ok!(run.execute().await);

    let keys: Vec<String> = transport
        .requests_to(&event_url("g1"))
        .iter()
        .filter_map(|r| r.param("apiKey").map(str::to_string))
        .collect();
    assert_eq!(keys, vec!["key-0", "key-1", "key-2"]);
    assert_eq!(stats.rate_limited(), 2);
    assert_eq!(stats.total_delay(), Duration::from_secs(3));
    assert_eq!(outcome.summary.fetch.rate_limited, 2);
    assert_eq!(outcome.markets[MARKET].consensus().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_reported_and_run_completes() {
    let transport = MockTransport::new();
    transport.respond_json(
        &games_url(),
        &serde_json::json!([listed_game("g1", &["fliff", "betmgm"]), listed_game("g2", &["fliff", "betmgm"])]),
    );
    for _ in 0..3 {
        transport.script(&event_url("g1"), Scripted::Respond(rate_limited()));
    }
    transport.respond_json(
        &event_url("g2"),
        &event_odds("g2", vec![over_under("fliff", MARKET, "Jayson Tatum", 2.5, 2.10, 1.74)]),
    );
    let mut params = make_params(&["fliff", "betmgm"], &["fliff"]);
    params.scheduler.game_timeout = Duration::from_secs(60);
    let (run, _) = make_run(&transport, 2, params);

    let outcome = assert_ok!(run.execute().await);

    assert!(outcome.summary.issues.iter().any(|i| matches!(
        i,
        RunIssue::Fetch { game_id, error: FetchError::RetriesExhausted { attempts: 3 } } if game_id == "g1"
    )));
    assert_eq!(outcome.summary.payloads_ingested, 1);
    assert_eq!(outcome.markets[MARKET].consensus().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_game_times_out_without_blocking_others() {
    let transport = MockTransport::new();
    transport.respond_json(
        &games_url(),
        &serde_json::json!([listed_game("g1", &["fliff", "betmgm"]), listed_game("g2", &["fliff", "betmgm"])]),
    );
    transport.script(
        &event_url("g1"),
        Scripted::Delayed(
            Duration::from_secs(30),
            ok(&event_odds("g1", vec![over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95)])),
        ),
    );
    transport.respond_json(
        &event_url("g2"),
        &event_odds("g2", vec![over_under("fliff", MARKET, "Jayson Tatum", 2.5, 2.10, 1.74)]),
    );
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "betmgm"], &["fliff"]));

    let outcome = assert_ok!(run.execute().await);

    assert_eq!(outcome.summary.games_timed_out, 1);
    assert_eq!(outcome.summary.games_fetched, 1);
    assert!(outcome
        .summary
        .issues
        .iter()
        .any(|i| matches!(i, RunIssue::Timeout { game_id, timeout_ms: 10_000 } if game_id == "g1")));
    let market = &outcome.markets[MARKET];
    assert_eq!(market.event_ids().into_iter().collect::<Vec<_>>(), vec!["g2"]);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_game_contributes_nothing() {
    let transport = MockTransport::new();
    transport.respond_json(&games_url(), &serde_json::json!([listed_game("g1", &["fliff", "betmgm"])]));
    transport.respond_json(
        &event_url("g1"),
        &event_odds("g1", vec![over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95)]),
    );
    transport.script(
        &event_url("g1"),
        Scripted::Delayed(
            Duration::from_secs(30),
            ok(&event_odds("g1", vec![over_under("betmgm", MARKET, "Stephen Curry", 4.5, 2.05, 1.77)])),
        ),
    );
    let mut params = make_params(&["fliff", "betmgm"], &["fliff"]);
    params.scheduler.batch_size = 1;
    let (run, _) = make_run(&transport, 1, params);

    let outcome = assert_ok!(run.execute().await);

    assert_eq!(transport.requests_to(&event_url("g1")).len(), 2);
    assert_eq!(outcome.summary.games_timed_out, 1);
    assert_eq!(outcome.summary.payloads_enqueued, 0);
    assert_eq!(outcome.summary.payloads_ingested, 0);
    assert!(outcome.markets.is_empty());
    assert_eq!(outcome.summary.consensus_entries, 0);
}

#[tokio::test]
async fn test_payload_for_unlisted_event_raises_integrity_warning() {
    let transport = MockTransport::new();
    transport.respond_json(&games_url(), &serde_json::json!([listed_game("g1", &["fliff", "betmgm"])]));
    // The provider answers the g1 request with odds for some other event.
    transport.respond_json(
        &event_url("g1"),
        &event_odds(
            "g7",
            vec![
                over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95),
                over_under("betmgm", MARKET, "Stephen Curry", 4.5, 2.05, 1.77),
            ],
        ),
    );
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "betmgm"], &["fliff"]));

    let outcome = assert_ok!(run.execute().await);

    assert!(outcome.summary.issues.iter().any(|i| matches!(
        i,
        RunIssue::DataIntegrity { event_id, detail, .. } if event_id == "g7" && detail.contains("unknown events")
    )));
    assert_eq!(outcome.summary.payloads_ingested, 1);
}

#[tokio::test]
async fn test_payload_without_expected_bookmakers_is_rejected() {
    let transport = MockTransport::new();
    transport.respond_json(&games_url(), &serde_json::json!([listed_game("g1", &["fliff", "betmgm"])]));
    transport.respond_json(
        &event_url("g1"),
        &event_odds("g1", vec![over_under("pinnacle", MARKET, "Stephen Curry", 4.5, 1.87, 1.95)]),
    );
    let (run, _) = make_run(&transport, 1, make_params(&["fliff", "betmgm"], &["fliff"]));

    let outcome = assert_ok!(run.execute().await);

    assert!(outcome.markets.is_empty());
    assert_eq!(outcome.summary.payloads_rejected, 1);
    assert!(matches!(
        &outcome.summary.issues[..],
        [RunIssue::BookmakerMismatch { event_id, .. }] if event_id == "g1"
    ));
}

// -- Batching --

#[tokio::test]
async fn test_many_bookmakers_split_into_batches() {
    let books: Vec<String> = (0..11).map(|i| format!("book{i}")).collect();
    let mut listed: Vec<&str> = books.iter().map(String::as_str).collect();
    listed.push("fliff");

    let transport = MockTransport::new();
    transport.respond_json(&games_url(), &serde_json::json!([listed_game("g1", &listed)]));
    transport.respond_json(
        &event_url("g1"),
        &event_odds("g1", vec![over_under("fliff", MARKET, "Stephen Curry", 4.5, 1.87, 1.95)]),
    );
    transport.respond_json(
        &event_url("g1"),
        &event_odds("g1", vec![over_under("book3", MARKET, "Stephen Curry", 4.5, 2.05, 1.77)]),
    );

    let (run, _) = make_run(&transport, 1, make_params(&listed, &["fliff"]));
    let outcome = assert_ok!(run.execute().await);

    let requests = transport.requests_to(&event_url("g1"));
    assert_eq!(requests.len(), 2);
    let sizes: Vec<usize> = requests
        .iter()
        .filter_map(|r| r.param("bookmakers"))
        .map(|b| b.split(',').count())
        .collect();
    assert_eq!(sizes.iter().sum::<usize>(), 12);
    assert!(sizes.contains(&10));

    let market = &outcome.markets[MARKET];
    assert_eq!(market.consensus().len(), 1);
    assert_eq!(market.comparisons().len(), 2);
    assert_eq!(outcome.summary.payloads_ingested, 2);
}
