//! HANDICAPPER: tool-augmented sports wagering recommendation engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the reasoning engine, data collaborators and store into the
//! `Recommender`, and serves the HTTP API until Ctrl+C. With the server
//! disabled it runs one structured request and prints the record.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use handicapper::api;
use handicapper::config::{self, AppConfig};
use handicapper::data::injuries::ApiSportsInjuries;
use handicapper::data::news::NewsApiClient;
use handicapper::data::projections::{HttpProjectionClient, SyntheticProjector};
use handicapper::data::ProjectionService;
use handicapper::engine::generator::CandidateGenerator;
use handicapper::engine::{RecommendationRequest, Recommender};
use handicapper::llm::anthropic::AnthropicClient;
use handicapper::llm::offline::OfflineEngine;
use handicapper::llm::openrouter::OpenRouterClient;
use handicapper::llm::ReasoningEngine;
use handicapper::storage::{DataStore, SqliteStore};
use handicapper::tools::builtin::{builtin_registry, BuiltinDeps};

const BANNER: &str = r#"
 _   _    _    _   _ ____ ___ ____    _    ____  ____  _____ ____
| | | |  / \  | \ | |  _ \_ _/ ___|  / \  |  _ \|  _ \| ____|  _ \
| |_| | / _ \ |  \| | | | | | |     / _ \ | |_) | |_) |  _| | |_) |
|  _  |/ ___ \| |\  | |_| | | |___ / ___ \|  __/|  __/| |___|  _ <
|_| |_/_/   \_\_| \_|____/___\____/_/   \_\_|   |_|   |_____|_| \_\

  Tool-augmented sports wagering recommendations
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        provider = %cfg.llm.provider,
        model = %cfg.llm.model,
        max_tool_rounds = cfg.engine.max_tool_rounds,
        min_edge_pct = cfg.candidates.min_edge_pct,
        "HANDICAPPER starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let store: Arc<dyn DataStore> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url, cfg.storage.max_connections)
            .await
            .context("Failed to open recommendation store")?,
    );

    let engine = build_engine(&cfg)?;

    let news_key = AppConfig::resolve_optional(cfg.data_sources.news_api_key_env.as_deref());
    let sports_key = AppConfig::resolve_optional(cfg.data_sources.api_sports_key_env.as_deref());
    if news_key.is_none() {
        warn!("No news API key configured, search_news will report unavailable");
    }
    if sports_key.is_none() {
        warn!("No API-Sports key configured, lookup_injuries will report unavailable");
    }

    let projections: Option<Arc<dyn ProjectionService>> = match cfg.data_sources.projection_url.as_deref() {
        Some(url) => {
            info!(url, "Using projection service");
            Some(Arc::new(HttpProjectionClient::new(url, cfg.candidates.projection_timeout_ms)?))
        }
        None => {
            warn!("No projection service configured, all projections are fallback-sourced");
            None
        }
    };

    let generator = Arc::new(CandidateGenerator::new(
        store.clone(),
        projections,
        SyntheticProjector::new(&cfg.fallback),
        cfg.candidates.clone(),
    ));

    let registry = builtin_registry(
        &cfg.tools,
        BuiltinDeps {
            news: Arc::new(NewsApiClient::new(news_key)?),
            injuries: Arc::new(ApiSportsInjuries::new(sports_key)?),
            store: store.clone(),
            generator: generator.clone(),
            default_lookahead_hours: cfg.candidates.lookahead_hours,
        },
    )?;
    info!(tools = ?registry.names(), "Tool registry ready");

    let server = cfg.server.clone();
    let recommender = Arc::new(Recommender::new(engine, store, generator, Arc::new(registry), cfg));

    // -- One-shot mode ---------------------------------------------------

    if !server.enabled {
        info!("API server disabled, running a single structured request");
        let record = recommender.recommend(RecommendationRequest::default()).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    // -- Serve -----------------------------------------------------------

    let handle = api::spawn_server(recommender, server.port).await?;
    info!("Serving. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received."),
        _ = handle => warn!("API server task ended"),
    }

    info!("HANDICAPPER shut down cleanly.");
    Ok(())
}

/// Pick the reasoning engine; no API key means offline mode, where every
/// request takes its deterministic fallback path.
fn build_engine(cfg: &AppConfig) -> Result<Arc<dyn ReasoningEngine>> {
    let api_key = std::env::var(&cfg.llm.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(env = %cfg.llm.api_key_env, "No LLM API key configured, running offline with fallback ranking only");
        return Ok(Arc::new(OfflineEngine));
    }

    let engine: Arc<dyn ReasoningEngine> = match cfg.llm.provider.as_str() {
        "anthropic" => {
            info!(model = %cfg.llm.model, "Using Anthropic LLM provider");
            Arc::new(AnthropicClient::new(
                api_key,
                Some(cfg.llm.model.clone()),
                Some(cfg.llm.max_tokens),
                cfg.llm.request_timeout_secs,
            )?)
        }
        "openrouter" => {
            info!(model = %cfg.llm.model, fallback = ?cfg.llm.fallback_model, "Using OpenRouter LLM provider");
            Arc::new(OpenRouterClient::new(
                api_key,
                Some(cfg.llm.model.clone()),
                cfg.llm.fallback_model.clone(),
                Some(cfg.llm.max_tokens),
                cfg.llm.request_timeout_secs,
            )?)
        }
        other => {
            warn!(provider = other, "Unknown LLM provider, defaulting to OpenRouter");
            Arc::new(OpenRouterClient::new(
                api_key,
                Some(cfg.llm.model.clone()),
                cfg.llm.fallback_model.clone(),
                Some(cfg.llm.max_tokens),
                cfg.llm.request_timeout_secs,
            )?)
        }
    };
    Ok(engine)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("handicapper=info"));

    let json_logging = std::env::var("HANDICAPPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
