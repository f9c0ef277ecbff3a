//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Provider API keys are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::devig::DevigMethod;
use crate::provider::odds_api::{DEFAULT_BASE_URL, MAX_BATCH_SIZE};
use crate::types::ReferenceBooks;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub run: RunConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reference_books: ReferenceBooksConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Provider sport key, e.g. "basketball_nba".
    pub sport: String,
    /// Base bookmakers to request. Reference bookmakers are added to this.
    pub bookmakers: Vec<String>,
    pub markets: Vec<String>,
    /// Bookmakers a market needs before it is considered to have enough
    /// data. Defaults to the full requested bookmaker count.
    #[serde(default)]
    pub min_bookmakers: Option<usize>,
    #[serde(default)]
    pub devig_method: DevigMethod,
    /// Write a JSON snapshot of the run here when set.
    #[serde(default)]
    pub export_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_regions")]
    pub regions: String,
    /// Env vars holding the API keys, in rotation order.
    pub api_key_envs: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_game_timeout_secs")]
    pub game_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_games")]
    pub max_concurrent_games: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            game_timeout_secs: default_game_timeout_secs(),
            max_concurrent_games: default_max_concurrent_games(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceBooksConfig {
    /// Reference bookmakers for markets without their own entry.
    #[serde(default = "default_reference_books")]
    pub default: Vec<String>,
    #[serde(default)]
    pub markets: HashMap<String, Vec<String>>,
}

impl Default for ReferenceBooksConfig {
    fn default() -> Self {
        Self {
            default: default_reference_books(),
            markets: HashMap::new(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_regions() -> String {
    "us".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_game_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_games() -> usize {
    8
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_queue_capacity() -> usize {
    256
}

fn default_reference_books() -> Vec<String> {
    vec!["draftkings".to_string()]
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.run.sport.trim().is_empty(), "run.sport must not be empty");
        anyhow::ensure!(!self.run.bookmakers.is_empty(), "run.bookmakers must not be empty");
        anyhow::ensure!(!self.run.markets.is_empty(), "run.markets must not be empty");
        anyhow::ensure!(
            !self.provider.api_key_envs.is_empty(),
            "provider.api_key_envs must name at least one variable"
        );
        anyhow::ensure!(self.scheduler.game_timeout_secs > 0, "scheduler.game_timeout_secs must be positive");
        anyhow::ensure!(self.scheduler.max_concurrent_games > 0, "scheduler.max_concurrent_games must be positive");
        anyhow::ensure!(
            (1..=MAX_BATCH_SIZE).contains(&self.scheduler.batch_size),
            "scheduler.batch_size must be between 1 and {MAX_BATCH_SIZE}"
        );
        anyhow::ensure!(self.scheduler.queue_capacity > 0, "scheduler.queue_capacity must be positive");
        anyhow::ensure!(
            !self.reference_books.default.is_empty(),
            "reference_books.default must not be empty"
        );
        if let Some((market, _)) = self.reference_books.markets.iter().find(|(_, books)| books.is_empty()) {
            anyhow::bail!("reference_books.markets.{market} must not be empty");
        }
        if let Some(min) = self.run.min_bookmakers {
            anyhow::ensure!(min > 0, "run.min_bookmakers must be positive");
        }
        Ok(())
    }

    /// Every bookmaker to request: the configured list followed by each
    /// reference bookmaker of each requested market, without duplicates.
    pub fn all_bookmakers(&self) -> Vec<String> {
        let refs = self.reference_books();
        let mut all: Vec<String> = Vec::new();
        let candidates = self
            .run
            .bookmakers
            .iter()
            .chain(self.run.markets.iter().flat_map(|m| refs.for_market(m).iter()));
        for book in candidates {
            if !all.contains(book) {
                all.push(book.clone());
            }
        }
        all
    }

    pub fn reference_books(&self) -> ReferenceBooks {
        ReferenceBooks::new(
            self.reference_books.default.clone(),
            self.reference_books.markets.clone(),
        )
    }

    pub fn min_bookmakers(&self) -> usize {
        self.run
            .min_bookmakers
            .unwrap_or_else(|| self.all_bookmakers().len())
    }

    /// Resolve every configured API key variable, in order.
    pub fn api_keys(&self) -> Result<Vec<String>> {
        self.provider
            .api_key_envs
            .iter()
            .map(|name| Self::resolve_env(name))
            .collect()
    }
}
