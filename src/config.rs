//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Every section has defaults so
//! a partial file (or none, in tests) still yields a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::{EngineError, MarketType};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    pub tools: ToolsConfig,
    pub candidates: CandidateConfig,
    pub selector: SelectorConfig,
    pub fallback: FallbackConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub data_sources: DataSourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// "anthropic" | "openrouter"
    pub provider: String,
    pub model: String,
    /// Fallback model for OpenRouter (used when primary model fails).
    pub fallback_model: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            fallback_model: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 1024,
            request_timeout_secs: 60,
        }
    }
}

/// Conversation orchestration limits.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum tool-resolution rounds per conversation.
    pub max_tool_rounds: u32,
    /// Backoff before the single retry of a failed reasoning-engine call.
    pub engine_retry_backoff_ms: u64,
    /// Deadline applied when a request does not carry its own.
    pub default_deadline_ms: u64,
    /// Chunk size used when a final answer is streamed from a buffered reply.
    pub stream_chunk_chars: usize,
    /// Appended to the conversational system prompt (house rules, tone).
    pub system_prompt_extra: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 2,
            engine_retry_backoff_ms: 500,
            default_deadline_ms: 45_000,
            stream_chunk_chars: 48,
            system_prompt_extra: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            retry_backoff_ms: 250,
        }
    }
}

/// Candidate generation thresholds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CandidateConfig {
    pub lookahead_hours: u32,
    /// Minimum percentage edge for a candidate to survive pre-filtering.
    pub min_edge_pct: f64,
    /// Minimum projected probability for a candidate to survive.
    pub min_probability: f64,
    /// Edges above this are treated as stale/erroneous quote artifacts.
    pub max_edge_pct: f64,
    /// Quotes older than this are ignored.
    pub max_quote_age_mins: i64,
    pub market_types: Vec<MarketType>,
    pub projection_timeout_ms: u64,
    pub projection_retry_backoff_ms: u64,
    /// Fractional Kelly multiplier for the stake hint (0.25 = quarter-Kelly).
    pub kelly_multiplier: f64,
    /// Stake hint cap as a fraction of bankroll.
    pub kelly_max_fraction: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            lookahead_hours: 48,
            min_edge_pct: 3.0,
            min_probability: 0.55,
            max_edge_pct: 30.0,
            max_quote_age_mins: 180,
            market_types: vec![MarketType::Moneyline, MarketType::Spread, MarketType::Total],
            projection_timeout_ms: 5_000,
            projection_retry_backoff_ms: 200,
            kelly_multiplier: 0.25,
            kelly_max_fraction: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SelectorConfig {
    /// Maximum candidates submitted to the reasoning engine for ranking.
    pub pool_cap: usize,
    pub default_count: usize,
    /// Hard upper bound on a requested count.
    pub max_count: usize,
    /// At most one candidate per event+market unless disabled.
    pub diversify: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            pool_cap: 40,
            default_count: 3,
            max_count: 20,
            diversify: true,
        }
    }
}

/// Synthetic projection used when the projection service is unavailable.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    /// Home advantage in rating points.
    pub home_advantage: f64,
    /// Rating assumed for teams missing from the strength table.
    pub default_rating: f64,
    /// Overrides/additions to the built-in strength table (team → rating).
    pub ratings: HashMap<String, f64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            home_advantage: 65.0,
            default_rating: 1500.0,
            ratings: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://handicapper.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DataSourcesConfig {
    pub news_api_key_env: Option<String>,
    pub api_sports_key_env: Option<String>,
    /// Base URL of the projection service; absent means fallback-only.
    pub projection_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Thresholds and caps are configuration with an assumed-positive
    /// contract; reject anything that would silently disable a guard.
    pub fn validate(&self) -> Result<(), EngineError> {
        let c = &self.candidates;
        if !(c.min_edge_pct > 0.0) {
            return Err(EngineError::Config("candidates.min_edge_pct must be positive".into()));
        }
        if !(c.min_probability > 0.0 && c.min_probability < 1.0) {
            return Err(EngineError::Config("candidates.min_probability must be in (0, 1)".into()));
        }
        if !(c.max_edge_pct > c.min_edge_pct) {
            return Err(EngineError::Config(
                "candidates.max_edge_pct must exceed min_edge_pct".into(),
            ));
        }
        if c.lookahead_hours == 0 || c.max_quote_age_mins <= 0 {
            return Err(EngineError::Config(
                "candidates.lookahead_hours and max_quote_age_mins must be positive".into(),
            ));
        }
        if !(c.kelly_multiplier > 0.0 && c.kelly_multiplier <= 1.0) {
            return Err(EngineError::Config("candidates.kelly_multiplier must be in (0, 1]".into()));
        }
        if !(c.kelly_max_fraction > 0.0 && c.kelly_max_fraction <= 1.0) {
            return Err(EngineError::Config("candidates.kelly_max_fraction must be in (0, 1]".into()));
        }
        if c.market_types.is_empty() {
            return Err(EngineError::Config("candidates.market_types must not be empty".into()));
        }
        if self.engine.max_tool_rounds == 0 {
            return Err(EngineError::Config("engine.max_tool_rounds must be positive".into()));
        }
        if self.engine.stream_chunk_chars == 0 {
            return Err(EngineError::Config("engine.stream_chunk_chars must be positive".into()));
        }
        let s = &self.selector;
        if s.pool_cap == 0 || s.default_count == 0 || s.max_count < s.default_count {
            return Err(EngineError::Config(
                "selector.pool_cap/default_count must be positive and max_count >= default_count".into(),
            ));
        }
        if self.tools.timeout_ms == 0 {
            return Err(EngineError::Config("tools.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an optional env-var reference, treating unset/empty as absent.
    pub fn resolve_optional(env_name: Option<&str>) -> Option<String> {
        env_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.engine.max_tool_rounds, 2);
        assert_eq!(cfg.selector.pool_cap, 40);
        assert!(cfg.selector.diversify);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [candidates]
            min_edge_pct = 4.5
            market_types = ["moneyline", "total"]

            [fallback.ratings]
            "Boston Celtics" = 1650.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.candidates.min_edge_pct, 4.5);
        assert_eq!(cfg.candidates.min_probability, 0.55);
        assert_eq!(cfg.candidates.market_types, vec![MarketType::Moneyline, MarketType::Total]);
        assert_eq!(cfg.fallback.ratings.get("Boston Celtics"), Some(&1650.0));
        assert_eq!(cfg.llm.provider, "anthropic");
    }

    #[test]
    fn test_rejects_non_positive_thresholds() {
        let err = AppConfig::from_toml("[candidates]\nmin_edge_pct = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("min_edge_pct"));

        let err = AppConfig::from_toml("[engine]\nmax_tool_rounds = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tool_rounds"));
    }

    #[test]
    fn test_rejects_probability_floor_out_of_range() {
        assert!(AppConfig::from_toml("[candidates]\nmin_probability = 1.2\n").is_err());
    }

    #[test]
    fn test_rejects_kelly_multiplier_above_full_kelly() {
        let err = AppConfig::from_toml("[candidates]\nkelly_multiplier = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("kelly_multiplier"));
    }

    #[test]
    fn test_load_config_file() {
        let path = std::env::temp_dir().join(format!("handicapper-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            "[engine]\nmax_tool_rounds = 3\n\n[candidates]\nmin_edge_pct = 2.5\nkelly_multiplier = 0.5\n\n[server]\nport = 9191\n",
        )
        .unwrap();

        let loaded = AppConfig::load(path.to_str().unwrap());
        fs::remove_file(&path).ok();
        let cfg = loaded.unwrap();
        assert_eq!(cfg.engine.max_tool_rounds, 3);
        assert_eq!(cfg.candidates.min_edge_pct, 2.5);
        assert_eq!(cfg.candidates.kelly_multiplier, 0.5);
        assert_eq!(cfg.candidates.max_edge_pct, 30.0);
        assert_eq!(cfg.server.port, 9191);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = AppConfig::load("/nonexistent/handicapper.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/handicapper.toml"));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        let cfg = AppConfig::load(path).unwrap();
        assert_eq!(cfg.engine.max_tool_rounds, 2);
        assert_eq!(cfg.candidates.min_edge_pct, 3.0);
    }

    #[test]
    fn test_resolve_optional_missing() {
        assert!(AppConfig::resolve_optional(Some("HANDICAPPER_TEST_UNSET_VAR_XYZ")).is_none());
        assert!(AppConfig::resolve_optional(None).is_none());
    }
}
