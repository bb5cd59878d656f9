//! Built-in read-only tools exposed to the reasoning engine.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{ParamKind, ParameterSchema, Tool, ToolError, ToolOutput, ToolRegistry};
use crate::config::ToolsConfig;
use crate::data::{InjuryLookup, NewsSearch};
use crate::engine::generator::{CandidateGenerator, CandidateRequest};
use crate::storage::DataStore;
use crate::strategy::edge;
use crate::strategy::selector::rank_deterministic;
use crate::types::{LookaheadWindow, MarketType, ProjectionSource, Side};

const MARKET_TYPES: &[&str] = &["moneyline", "spread", "total", "prop"];
const SIDES: &[&str] = &["home", "away", "over", "under"];
const DEFAULT_VALUE_BET_LIMIT: usize = 10;

/// Everything the built-in tools read from.
#[derive(Clone)]
pub struct BuiltinDeps {
    pub news: Arc<dyn NewsSearch>,
    pub injuries: Arc<dyn InjuryLookup>,
    pub store: Arc<dyn DataStore>,
    pub generator: Arc<CandidateGenerator>,
    pub default_lookahead_hours: u32,
}

/// Registry with every built-in tool registered.
pub fn builtin_registry(config: &ToolsConfig, deps: BuiltinDeps) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new(config);
    registry.register(SearchNews { news: deps.news })?;
    registry.register(LookupInjuries { injuries: deps.injuries })?;
    registry.register(GetScheduledEvents {
        store: deps.store.clone(),
        default_lookahead_hours: deps.default_lookahead_hours,
    })?;
    registry.register(GetBestOdds { store: deps.store })?;
    registry.register(EvaluateEdge)?;
    registry.register(FindValueBets { generator: deps.generator })?;
    Ok(registry)
}

// ---- search_news ----

pub struct SearchNews {
    news: Arc<dyn NewsSearch>,
}

#[derive(Debug, Deserialize)]
pub struct SearchNewsArgs {
    query: String,
}

#[async_trait]
impl Tool for SearchNews {
    type Args = SearchNewsArgs;

    fn name(&self) -> &'static str {
        "search_news"
    }

    fn description(&self) -> &'static str {
        "Search recent sports news headlines. Returns headlines with sources and a sentiment score."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new().required("query", ParamKind::String, "Search terms, e.g. a team or player name")
    }

    async fn run(&self, args: SearchNewsArgs) -> Result<ToolOutput> {
        Ok(ToolOutput::News(self.news.search(&args.query).await?))
    }
}

// ---- lookup_injuries ----

pub struct LookupInjuries {
    injuries: Arc<dyn InjuryLookup>,
}

#[derive(Debug, Deserialize)]
pub struct LookupInjuriesArgs {
    team: String,
    sport: String,
}

#[async_trait]
impl Tool for LookupInjuries {
    type Args = LookupInjuriesArgs;

    fn name(&self) -> &'static str {
        "lookup_injuries"
    }

    fn description(&self) -> &'static str {
        "Current injury report for a team: player, status and reason."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("team", ParamKind::String, "Full team name")
            .required("sport", ParamKind::String, "League key, e.g. nba, nfl")
    }

    async fn run(&self, args: LookupInjuriesArgs) -> Result<ToolOutput> {
        Ok(ToolOutput::Injuries(self.injuries.lookup(&args.team, &args.sport).await?))
    }
}

// ---- get_scheduled_events ----

pub struct GetScheduledEvents {
    store: Arc<dyn DataStore>,
    default_lookahead_hours: u32,
}

#[derive(Debug, Deserialize)]
pub struct GetScheduledEventsArgs {
    #[serde(default)]
    sport: Option<String>,
    #[serde(default)]
    lookahead_hours: Option<u32>,
}

#[async_trait]
impl Tool for GetScheduledEvents {
    type Args = GetScheduledEventsArgs;

    fn name(&self) -> &'static str {
        "get_scheduled_events"
    }

    fn description(&self) -> &'static str {
        "List upcoming scheduled events (id, sport, home, away, start time)."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optional("sport", ParamKind::String, "League key filter, e.g. nba")
            .optional("lookahead_hours", ParamKind::Integer, "How far ahead to look (hours)")
    }

    async fn run(&self, args: GetScheduledEventsArgs) -> Result<ToolOutput> {
        let hours = args
            .lookahead_hours
            .filter(|h| *h > 0)
            .unwrap_or(self.default_lookahead_hours);
        let window = LookaheadWindow::starting_now(hours);
        let events = self
            .store
            .get_scheduled_events(&window, args.sport.as_deref())
            .await?;
        Ok(ToolOutput::Events(events))
    }
}

// ---- get_best_odds ----

pub struct GetBestOdds {
    store: Arc<dyn DataStore>,
}

#[derive(Debug, Deserialize)]
pub struct GetBestOddsArgs {
    event_id: String,
    market_type: MarketType,
    side: Side,
}

#[async_trait]
impl Tool for GetBestOdds {
    type Args = GetBestOddsArgs;

    fn name(&self) -> &'static str {
        "get_best_odds"
    }

    fn description(&self) -> &'static str {
        "Best available American-odds quote for one side of one market. Returns null when no quote exists."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("event_id", ParamKind::String, "Event id from get_scheduled_events")
            .required("market_type", ParamKind::Enum(MARKET_TYPES), "Market type")
            .required("side", ParamKind::Enum(SIDES), "home/away for moneyline and spread, over/under for totals")
    }

    async fn run(&self, args: GetBestOddsArgs) -> Result<ToolOutput> {
        let quote = self
            .store
            .get_best_quote(&args.event_id, args.market_type, args.side)
            .await?;
        Ok(ToolOutput::Quote(quote))
    }
}

// ---- evaluate_edge ----

pub struct EvaluateEdge;

#[derive(Debug, Deserialize)]
pub struct EvaluateEdgeArgs {
    price: i32,
    projected_probability: f64,
    #[serde(default)]
    fallback_sourced: bool,
}

#[async_trait]
impl Tool for EvaluateEdge {
    type Args = EvaluateEdgeArgs;

    fn name(&self) -> &'static str {
        "evaluate_edge"
    }

    fn description(&self) -> &'static str {
        "Implied probability, percentage edge and confidence band for an American price against a projected win probability."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("price", ParamKind::Integer, "American odds, e.g. -150 or 130")
            .required("projected_probability", ParamKind::Number, "Projected win probability in (0, 1)")
            .optional("fallback_sourced", ParamKind::Boolean, "True if the projection is synthetic")
    }

    async fn run(&self, args: EvaluateEdgeArgs) -> Result<ToolOutput> {
        let source = if args.fallback_sourced {
            ProjectionSource::Fallback
        } else {
            ProjectionSource::Primary
        };
        Ok(ToolOutput::Edge(edge::evaluate(args.price, args.projected_probability, source)?))
    }
}

// ---- find_value_bets ----

pub struct FindValueBets {
    generator: Arc<CandidateGenerator>,
}

#[derive(Debug, Deserialize)]
pub struct FindValueBetsArgs {
    #[serde(default)]
    sport: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    market_type: Option<MarketType>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for FindValueBets {
    type Args = FindValueBetsArgs;

    fn name(&self) -> &'static str {
        "find_value_bets"
    }

    fn description(&self) -> &'static str {
        "Generate pre-filtered value-bet candidates (price, implied and projected probability, edge, confidence), best first. Cite candidates by their id."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optional("sport", ParamKind::String, "League key filter, e.g. nba")
            .optional("event_id", ParamKind::String, "Restrict to one event")
            .optional("market_type", ParamKind::Enum(MARKET_TYPES), "Restrict to one market type")
            .optional("limit", ParamKind::Integer, "Maximum candidates to return (default 10)")
    }

    async fn run(&self, args: FindValueBetsArgs) -> Result<ToolOutput> {
        let request = CandidateRequest {
            sport: args.sport,
            event_id: args.event_id,
            market_types: args.market_type.map(|m| vec![m]),
            lookahead_hours: None,
        };
        let report = self.generator.generate(&request).await;
        if report.candidates.is_empty() {
            if let Some(reason) = report.degradations.first() {
                anyhow::bail!("No candidates available: {reason}");
            }
        }
        let limit = args.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_VALUE_BET_LIMIT);
        let mut ranked = rank_deterministic(&report.candidates);
        ranked.truncate(limit);
        Ok(ToolOutput::Candidates(ranked))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
