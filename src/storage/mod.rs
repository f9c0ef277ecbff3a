//! Run snapshot export.
//!
//! Writes the outcome of a run (summary plus every market's consensus and
//! quotes) to a JSON file. Nothing is read back by the engine itself; the
//! loader exists for tooling and tests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregate::{Market, MarketSnapshot};
use crate::engine::pipeline::RunSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub summary: RunSummary,
    pub markets: Vec<MarketSnapshot>,
}

impl RunSnapshot {
    pub fn new(summary: RunSummary, markets: &BTreeMap<String, Market>) -> Self {
        Self {
            summary,
            markets: markets.values().map(Market::snapshot).collect(),
        }
    }
}

/// Save a run snapshot to a JSON file.
pub fn save_snapshot(snapshot: &RunSnapshot, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise run snapshot")?;

    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write snapshot to {path}"))?;

    debug!(path, markets = snapshot.markets.len(), bytes = json.len(), "Snapshot saved");
    Ok(())
}

/// Load a run snapshot. Returns None if the file doesn't exist.
pub fn load_snapshot(path: &str) -> Result<Option<RunSnapshot>> {
    if !Path::new(path).exists() {
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot from {path}"))?;

    let snapshot: RunSnapshot = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        run_id = %snapshot.summary.run_id,
        markets = snapshot.markets.len(),
        "Snapshot loaded"
    );

    Ok(Some(snapshot))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
