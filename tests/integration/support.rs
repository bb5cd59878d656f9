//! Shared fixtures and test doubles.
//!
//! Scripted reasoning engines replay fixed replies so conversations are
//! deterministic. Collaborator traits are mocked with `mockall`; the data
//! store is the in-memory implementation seeded per test.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use mockall::mock;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use handicapper::config::AppConfig;
use handicapper::data::projections::SyntheticProjector;
use handicapper::data::{InjuryLookup, InjuryReport, NewsDigest, NewsSearch, ProjectionService};
use handicapper::engine::generator::CandidateGenerator;
use handicapper::engine::Recommender;
use handicapper::llm::{EngineReply, ReasoningEngine, ToolCallRequest, ToolDefinition, Turn};
use handicapper::storage::{DataStore, MemoryStore};
use handicapper::tools::builtin::{builtin_registry, BuiltinDeps};
use handicapper::types::*;

// ---------------------------------------------------------------------------
// Collaborator mocks
// ---------------------------------------------------------------------------

mock! {
    pub Projections {}

    #[async_trait]
    impl ProjectionService for Projections {
        async fn project(&self, event: &Event) -> Result<ModelProjection>;
    }
}

mock! {
    pub News {}

    #[async_trait]
    impl NewsSearch for News {
        async fn search(&self, query: &str) -> Result<NewsDigest>;
    }
}

mock! {
    pub Injuries {}

    #[async_trait]
    impl InjuryLookup for Injuries {
        async fn lookup(&self, team: &str, sport: &str) -> Result<InjuryReport>;
    }
}

/// Projection service returning `p_home` for every event.
pub fn fixed_projections(p_home: f64) -> MockProjections {
    let mut mock = MockProjections::new();
    mock.expect_project().returning(move |event| {
        Ok(ModelProjection {
            event_id: event.id.clone(),
            home_win_probability: p_home,
            expected_margin: None,
            expected_total: None,
            confidence: 0.8,
            model_version: "proj-v3".to_string(),
            source: ProjectionSource::Primary,
        })
    });
    mock
}

pub fn quiet_news() -> MockNews {
    let mut mock = MockNews::new();
    mock.expect_search().returning(|query| {
        Ok(NewsDigest {
            query: query.to_string(),
            headlines: Vec::new(),
            sentiment: 0.0,
            source: "mock".to_string(),
        })
    });
    mock
}

pub fn no_injuries() -> MockInjuries {
    let mut mock = MockInjuries::new();
    mock.expect_lookup().returning(|team, sport| {
        Ok(InjuryReport {
            team: team.to_string(),
            sport: sport.to_string(),
            players: Vec::new(),
            source: "mock".to_string(),
        })
    });
    mock
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn event(id: &str, home: &str, away: &str, hours_ahead: i64) -> Event {
    Event {
        id: id.to_string(),
        sport: "nba".to_string(),
        home: home.to_string(),
        away: away.to_string(),
        starts_at: Utc::now() + Duration::hours(hours_ahead),
        status: EventStatus::Scheduled,
    }
}

pub fn quote(event_id: &str, market_type: MarketType, side: Side, price: i32, line: Option<f64>) -> MarketQuote {
    MarketQuote {
        event_id: event_id.to_string(),
        market_type,
        side,
        price,
        line,
        source: "bookA".to_string(),
        is_best: false,
        fetched_at: Utc::now(),
    }
}

/// Event E: Boston (home) -150 / Miami (away) +130 on the moneyline.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_event(&event("evt-e", "Boston Celtics", "Miami Heat", 6))
        .await
        .unwrap();
    store
        .insert_quote(&quote("evt-e", MarketType::Moneyline, Side::Home, -150, None))
        .await
        .unwrap();
    store
        .insert_quote(&quote("evt-e", MarketType::Moneyline, Side::Away, 130, None))
        .await
        .unwrap();
    store
}

pub fn candidate(id: &str, event_id: &str, market_type: MarketType, edge_pct: f64, band: ConfidenceBand) -> Candidate {
    Candidate {
        id: id.to_string(),
        event_id: event_id.to_string(),
        sport: "nba".to_string(),
        matchup: "Away @ Home".to_string(),
        starts_at: Utc::now() + Duration::hours(4),
        market_type,
        side: Side::Home,
        line: None,
        price: -110,
        quote_source: "bookA".to_string(),
        implied_probability: 0.5238,
        projected_probability: 0.6,
        edge_pct,
        confidence: band,
        stake_fraction: 0.01,
        projection_source: ProjectionSource::Primary,
        model_version: "proj-v3".to_string(),
        rationale: String::new(),
        state: CandidateState::Evaluated,
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.engine_retry_backoff_ms = 1;
    config.engine.stream_chunk_chars = 12;
    config.tools.retry_backoff_ms = 1;
    config.candidates.projection_timeout_ms = 200;
    config.candidates.projection_retry_backoff_ms = 1;
    config
}

/// Fully wired recommender over the given store, engine and projections.
pub fn recommender(
    engine: Arc<dyn ReasoningEngine>,
    store: Arc<dyn DataStore>,
    projections: Option<Arc<dyn ProjectionService>>,
) -> Arc<Recommender> {
    let config = test_config();
    let generator = Arc::new(CandidateGenerator::new(
        store.clone(),
        projections,
        SyntheticProjector::new(&config.fallback),
        config.candidates.clone(),
    ));
    let registry = builtin_registry(
        &config.tools,
        BuiltinDeps {
            news: Arc::new(quiet_news()),
            injuries: Arc::new(no_injuries()),
            store: store.clone(),
            generator: generator.clone(),
            default_lookahead_hours: config.candidates.lookahead_hours,
        },
    )
    .unwrap();
    Arc::new(Recommender::new(engine, store, generator, Arc::new(registry), config))
}

// ---------------------------------------------------------------------------
// Scripted engines
// ---------------------------------------------------------------------------

/// Replays replies in order; errors once the script is exhausted.
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<EngineReply>>>,
    /// Number of tool definitions offered on each call.
    pub offered: Mutex<Vec<usize>>,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<Result<EngineReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            offered: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.offered.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn converse(&self, _turns: &[Turn], tools: &[ToolDefinition]) -> Result<EngineReply> {
        self.offered.lock().unwrap().push(tools.len());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("script exhausted")))
    }

    fn model_name(&self) -> &str {
        "scripted-v1"
    }
}

/// Asks for another tool call on every turn, whatever it is offered.
pub struct ToolHungryEngine;

#[async_trait]
impl ReasoningEngine for ToolHungryEngine {
    async fn converse(&self, turns: &[Turn], _tools: &[ToolDefinition]) -> Result<EngineReply> {
        Ok(EngineReply::ToolCallBatch {
            preamble: None,
            calls: vec![ToolCallRequest {
                call_id: format!("call-{}", turns.len()),
                name: "search_news".to_string(),
                args: json!({"query": "Celtics"}),
            }],
        })
    }

    fn model_name(&self) -> &str {
        "tool-hungry"
    }
}

/// Always answers, never with a usable selection.
pub struct MalformedEngine;

#[async_trait]
impl ReasoningEngine for MalformedEngine {
    async fn converse(&self, _turns: &[Turn], _tools: &[ToolDefinition]) -> Result<EngineReply> {
        Ok(EngineReply::FinalAnswer(
            "I like the Celtics tonight, maybe the over too!".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "malformed"
    }
}

pub fn tool_call(call_id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        call_id: call_id.to_string(),
        name: name.to_string(),
        args,
    }
}
