//! Shared types for the HANDICAPPER engine.
//!
//! These types form the data model used across all modules: scheduled
//! events and their market quotes, model projections, candidate bets and
//! the persisted recommendation record. They are kept free of behaviour
//! that needs the network so that strategy, storage and engine modules can
//! depend on them without circular references.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle status of a sporting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Live,
    Final,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Scheduled => write!(f, "scheduled"),
            EventStatus::Live => write!(f, "live"),
            EventStatus::Final => write!(f, "final"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(EventStatus::Scheduled),
            "live" | "in_progress" => Ok(EventStatus::Live),
            "final" | "closed" => Ok(EventStatus::Final),
            _ => Err(EngineError::Validation(format!("Unknown event status: {s}"))),
        }
    }
}

/// A scheduled sporting event. Produced by the ingestion side; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// League/sport key, e.g. "nba", "nfl".
    pub sport: String,
    pub home: String,
    pub away: String,
    pub starts_at: DateTime<Utc>,
    pub status: EventStatus,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} {})",
            self.sport,
            self.matchup(),
            self.starts_at.format("%Y-%m-%d %H:%M UTC"),
            self.status,
        )
    }
}

impl Event {
    /// "Away @ Home" label used in prompts and rationale text.
    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away, self.home)
    }

    /// Whether the event is still open for pre-game wagering inside `window`.
    pub fn is_open_within(&self, window: &LookaheadWindow) -> bool {
        self.status == EventStatus::Scheduled && window.contains(self.starts_at)
    }

    #[cfg(test)]
    pub fn sample() -> Self {
        Event {
            id: "evt-001".to_string(),
            sport: "nba".to_string(),
            home: "Boston Celtics".to_string(),
            away: "Miami Heat".to_string(),
            starts_at: Utc::now() + Duration::hours(6),
            status: EventStatus::Scheduled,
        }
    }
}

/// Bounded time range used to pull scheduled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookaheadWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl LookaheadWindow {
    pub fn starting_now(hours: u32) -> Self {
        Self::starting_at(Utc::now(), hours)
    }

    pub fn starting_at(from: DateTime<Utc>, hours: u32) -> Self {
        Self {
            from,
            to: from + Duration::hours(i64::from(hours)),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// Wagering market type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
    Prop,
}

impl MarketType {
    /// Sides that can be quoted in this market.
    pub fn sides(&self) -> &'static [Side] {
        match self {
            MarketType::Moneyline | MarketType::Spread => &[Side::Home, Side::Away],
            MarketType::Total | MarketType::Prop => &[Side::Over, Side::Under],
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Moneyline => write!(f, "moneyline"),
            MarketType::Spread => write!(f, "spread"),
            MarketType::Total => write!(f, "total"),
            MarketType::Prop => write!(f, "prop"),
        }
    }
}

impl std::str::FromStr for MarketType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moneyline" | "h2h" | "ml" => Ok(MarketType::Moneyline),
            "spread" | "spreads" | "handicap" => Ok(MarketType::Spread),
            "total" | "totals" | "over_under" => Ok(MarketType::Total),
            "prop" | "props" => Ok(MarketType::Prop),
            _ => Err(EngineError::Validation(format!("Unknown market type: {s}"))),
        }
    }
}

/// Side of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Away => write!(f, "away"),
            Side::Over => write!(f, "over"),
            Side::Under => write!(f, "under"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            _ => Err(EngineError::Validation(format!("Unknown side: {s}"))),
        }
    }
}

/// A bookmaker price for one side of one market, in American odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub event_id: String,
    pub market_type: MarketType,
    pub side: Side,
    /// American odds: +150 pays 150 per 100 staked, -150 needs 150 to win 100.
    pub price: i32,
    /// Spread/total threshold, if the market has one.
    pub line: Option<f64>,
    pub source: String,
    /// Feed-supplied "best available" flag.
    pub is_best: bool,
    pub fetched_at: DateTime<Utc>,
}

impl fmt::Display for MarketQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.line.map(|l| format!(" {l:+}")).unwrap_or_default();
        write!(
            f,
            "{} {} {}{} {:+} ({})",
            self.event_id, self.market_type, self.side, line, self.price, self.source,
        )
    }
}

impl MarketQuote {
    /// Age of the quote relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Where a projection came from. Fallback numbers are never presented as
/// primary data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionSource {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "fallback-sourced")]
    Fallback,
}

impl fmt::Display for ProjectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionSource::Primary => write!(f, "primary"),
            ProjectionSource::Fallback => write!(f, "fallback-sourced"),
        }
    }
}

/// Statistical projection for one event. External input, never derived by
/// the engine except for the labelled synthetic fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProjection {
    pub event_id: String,
    /// Projected probability that the home side wins outright.
    pub home_win_probability: f64,
    /// Expected home-minus-away margin, if the model projects one.
    #[serde(default)]
    pub expected_margin: Option<f64>,
    /// Expected combined score, if the model projects one.
    #[serde(default)]
    pub expected_total: Option<f64>,
    /// Model self-reported confidence (0–1).
    pub confidence: f64,
    pub model_version: String,
    #[serde(default = "default_projection_source")]
    pub source: ProjectionSource,
}

fn default_projection_source() -> ProjectionSource {
    ProjectionSource::Primary
}

impl ModelProjection {
    pub fn is_fallback(&self) -> bool {
        self.source == ProjectionSource::Fallback
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Confidence band derived from projected probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    /// Ranking weight used by the deterministic selector.
    pub fn weight(&self) -> f64 {
        match self {
            ConfidenceBand::Low => 0.5,
            ConfidenceBand::Medium => 0.75,
            ConfidenceBand::High => 1.0,
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceBand::Low => write!(f, "Low"),
            ConfidenceBand::Medium => write!(f, "Medium"),
            ConfidenceBand::High => write!(f, "High"),
        }
    }
}

/// Candidate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Generated,
    Evaluated,
    Selected,
    Discarded,
    Persisted,
}

/// One proposed bet under evaluation. Always carries the exact price used,
/// so `implied_probability` and `edge_pct` can be re-derived from
/// `(price, projected_probability)` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub event_id: String,
    pub sport: String,
    pub matchup: String,
    pub starts_at: DateTime<Utc>,
    pub market_type: MarketType,
    pub side: Side,
    pub line: Option<f64>,
    /// American odds of the quote the edge was computed against.
    pub price: i32,
    pub quote_source: String,
    pub implied_probability: f64,
    pub projected_probability: f64,
    /// Percentage edge over the implied probability.
    pub edge_pct: f64,
    pub confidence: ConfidenceBand,
    /// Fractional Kelly stake hint, as a fraction of bankroll.
    pub stake_fraction: f64,
    pub projection_source: ProjectionSource,
    pub model_version: String,
    pub rationale: String,
    pub state: CandidateState,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:+} | implied={:.1}% proj={:.1}% edge={:+.1}% | {} [{}]",
            self.matchup,
            self.market_type,
            self.side,
            self.price,
            self.implied_probability * 100.0,
            self.projected_probability * 100.0,
            self.edge_pct,
            self.confidence,
            self.id,
        )
    }
}

impl Candidate {
    /// Deterministic identifier: same event/market/side/line always maps to
    /// the same id, which lets the reasoning engine refer back to it.
    pub fn make_id(event_id: &str, market_type: MarketType, side: Side, line: Option<f64>) -> String {
        match line {
            Some(l) => format!("{event_id}:{market_type}:{side}:{l}"),
            None => format!("{event_id}:{market_type}:{side}"),
        }
    }

    /// Key used for the one-per-event-and-market diversification rule.
    pub fn diversity_key(&self) -> (&str, MarketType) {
        (self.event_id.as_str(), self.market_type)
    }

    pub fn is_fallback_sourced(&self) -> bool {
        self.projection_source == ProjectionSource::Fallback
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// Which request path produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Structured,
    Conversational,
}

/// How the final candidate set was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Reasoning engine ranked the pool.
    Engine,
    /// Deterministic edge × confidence sort.
    Fallback,
    /// Nothing to select from.
    EmptyPool,
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMethod::Engine => write!(f, "engine"),
            SelectionMethod::Fallback => write!(f, "fallback"),
            SelectionMethod::EmptyPool => write!(f, "empty_pool"),
        }
    }
}

/// Why a conversation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    FinalAnswer,
    MaxTurnsExceeded,
    Error { detail: String },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::FinalAnswer => write!(f, "final_answer"),
            TerminationReason::MaxTurnsExceeded => write!(f, "max_turns_exceeded"),
            TerminationReason::Error { detail } => write!(f, "error: {detail}"),
        }
    }
}

/// Audit metadata stamped on every recommendation, degraded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetadata {
    pub tools_used: Vec<String>,
    pub processing_time_ms: u64,
    pub model_version: String,
    pub confidence_band: ConfidenceBand,
    #[serde(default)]
    pub selection_method: Option<SelectionMethod>,
    #[serde(default)]
    pub termination: Option<TerminationReason>,
    /// True when any candidate rests on a synthetic projection.
    pub fallback_sourced: bool,
    /// True when the record carries no candidates and no substantive answer.
    pub empty: bool,
    /// Human-readable notes on every degradation taken while building it.
    pub degradations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The persisted, auditable output of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub kind: RecommendationKind,
    pub candidates: Vec<Candidate>,
    pub rationale: String,
    pub confidence_band: ConfidenceBand,
    pub metadata: RecommendationMetadata,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Recommendation {} ({:?}): {} candidate(s), confidence={}, tools={}, {}ms",
            self.id,
            self.kind,
            self.candidates.len(),
            self.confidence_band,
            self.metadata.tools_used.len(),
            self.metadata.processing_time_ms,
        )
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Incremental event emitted by the streaming conversational path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking { message: String },
    ToolStart { call_id: String, name: String },
    ToolEnd {
        call_id: String,
        name: String,
        ok: bool,
        elapsed_ms: u64,
    },
    Content { text: String },
    Error { message: String },
    Complete { recommendation: Box<Recommendation> },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Complete { .. } => "complete",
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Engine-level error taxonomy.
///
/// Only `Validation` ever reaches a caller; every other variant is turned
/// into a fallback or a labelled low-confidence record.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream unavailable ({service}): {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("Tool execution error ({tool}): {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Could not parse selection output: {0}")]
    SelectionParse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn upstream(service: &str, err: impl fmt::Display) -> Self {
        EngineError::UpstreamUnavailable {
            service: service.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether a single retry with backoff is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::UpstreamUnavailable { .. } | EngineError::Storage(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
