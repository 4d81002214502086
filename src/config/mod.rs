//! Configuration management for CLI, environment variables, and config files.

use crate::error::{ValidationIssue, ViewRankError};
use redis::IntoConnectionInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for viewrank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and key layout of the counter/ranking store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    /// Counter keys are `{key_prefix}:{item_id}:views`
    pub key_prefix: String,
    /// Sorted set holding the leaderboard
    pub ranking_key: String,
    pub command_timeout_ms: u64,
    /// Retries for idempotent reads only; increments are never retried
    pub max_read_retries: u32,
    pub retry_delay_ms: u64,
    /// Update counter and ranking in a single atomic script
    pub atomic_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

/// Item lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// JSON catalog of item records used by the command-line tool
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log a metrics summary when the tool exits
    pub metrics_summary: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "image".to_string(),
            ranking_key: "image_ranking".to_string(),
            command_timeout_ms: 500,
            max_read_retries: 2,
            retry_delay_ms: 50,
            atomic_updates: false,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            cache_max_entries: 1000,
            catalog_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_summary: false,
        }
    }
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

const MAX_COMMAND_TIMEOUT_MS: u64 = 60_000;

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ViewRankError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ViewRankError::InvalidArgument(format!(
            "{} has invalid format",
            name
        )));
    }
    value
        .parse()
        .map_err(|_| ViewRankError::InvalidArgument(format!("{} has invalid format", name)))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ViewRankError> {
        let content = std::fs::read_to_string(path)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    pub fn from_default_locations() -> Result<Self, ViewRankError> {
        let config_paths = [
            dirs::config_dir().map(|d| d.join("viewrank/config.toml")),
            Some(PathBuf::from("/etc/viewrank/config.toml")),
            Some(PathBuf::from("./viewrank.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, ViewRankError> {
        if let Ok(val) = std::env::var("VIEWRANK_STORE_URL") {
            self.store.url = val;
        }
        if let Ok(val) = std::env::var("VIEWRANK_KEY_PREFIX") {
            self.store.key_prefix = val;
        }
        if let Ok(val) = std::env::var("VIEWRANK_RANKING_KEY") {
            self.store.ranking_key = val;
        }
        if let Ok(val) = std::env::var("VIEWRANK_COMMAND_TIMEOUT_MS") {
            self.store.command_timeout_ms = parse_env("VIEWRANK_COMMAND_TIMEOUT_MS", &val)?;
        }
        if let Ok(val) = std::env::var("VIEWRANK_MAX_READ_RETRIES") {
            self.store.max_read_retries = parse_env("VIEWRANK_MAX_READ_RETRIES", &val)?;
        }
        if let Ok(val) = std::env::var("VIEWRANK_ATOMIC_UPDATES") {
            self.store.atomic_updates = parse_env("VIEWRANK_ATOMIC_UPDATES", &val)?;
        }
        if let Ok(val) = std::env::var("VIEWRANK_DEFAULT_LIMIT") {
            self.ranking.default_limit = parse_env("VIEWRANK_DEFAULT_LIMIT", &val)?;
        }
        if let Ok(val) = std::env::var("VIEWRANK_CATALOG") {
            self.repository.catalog_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("VIEWRANK_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref url) = cli.store_url {
            self.store.url = url.clone();
        }
        if let Some(ref prefix) = cli.key_prefix {
            self.store.key_prefix = prefix.clone();
        }
        if let Some(ref catalog) = cli.catalog {
            self.repository.catalog_path = Some(catalog.clone());
        }
        if cli.atomic {
            self.store.atomic_updates = true;
        }

        self
    }

    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, ViewRankError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), ViewRankError> {
        let mut issues = Vec::new();
        let mut issue = |field: &str, message: String| {
            issues.push(ValidationIssue {
                field: field.to_string(),
                message,
            })
        };

        if self.store.url.is_empty() {
            issue("store.url", "URL cannot be empty".to_string());
        } else if let Err(e) = self.store.url.as_str().into_connection_info() {
            issue("store.url", format!("Invalid store URL: {}", e));
        }

        if self.store.key_prefix.trim().is_empty() {
            issue("store.key_prefix", "Key prefix cannot be empty".to_string());
        }
        if self.store.ranking_key.trim().is_empty() {
            issue("store.ranking_key", "Ranking key cannot be empty".to_string());
        }

        if self.store.command_timeout_ms == 0 || self.store.command_timeout_ms > MAX_COMMAND_TIMEOUT_MS
        {
            issue(
                "store.command_timeout_ms",
                format!("Must be between 1 and {}", MAX_COMMAND_TIMEOUT_MS),
            );
        }

        if self.circuit_breaker.failure_threshold == 0 {
            issue(
                "circuit_breaker.failure_threshold",
                "Must be at least 1".to_string(),
            );
        }

        if self.ranking.max_limit == 0 {
            issue("ranking.max_limit", "Must be at least 1".to_string());
        }
        if self.ranking.default_limit == 0 || self.ranking.default_limit > self.ranking.max_limit {
            issue(
                "ranking.default_limit",
                format!("Must be between 1 and {}", self.ranking.max_limit),
            );
        }

        if self.repository.cache_max_entries == 0 {
            issue(
                "repository.cache_max_entries",
                "Must be at least 1".to_string(),
            );
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issue(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ViewRankError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub store_url: Option<String>,
    pub key_prefix: Option<String>,
    pub catalog: Option<PathBuf>,
    pub atomic: bool,
}
