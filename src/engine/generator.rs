//! Candidate generator.
//!
//! For each scheduled event in the lookahead window: obtain a projection
//! (primary service with timeout and one retry, otherwise the labelled
//! synthetic fallback), fetch the best quote for every allowed market and
//! side, and emit the candidates that survive the pre-filter.
//!
//! Events are processed concurrently; output order follows event order
//! (start time, then id) and the fixed market/side order within an event.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CandidateConfig;
use crate::data::projections::SyntheticProjector;
use crate::data::ProjectionService;
use crate::storage::DataStore;
use crate::strategy::edge::EdgeThresholds;
use crate::strategy::kelly::{KellyCalculator, KellyConfig};
use crate::strategy::{Assessment, PriceEvaluator};
use crate::types::{
    Candidate, CandidateState, EngineError, Event, LookaheadWindow, MarketQuote, MarketType,
    ModelProjection, Side,
};

// ---------------------------------------------------------------------------
// Spread/total conversion
// ---------------------------------------------------------------------------

/// Standard deviation of the final margin and final total, per league.
fn score_sigma(sport: &str) -> (f64, f64) {
    match sport.to_lowercase().as_str() {
        "nba" | "wnba" | "ncaab" => (12.0, 18.0),
        "nfl" | "ncaaf" => (13.5, 10.0),
        "mlb" => (4.0, 3.5),
        "nhl" => (2.3, 2.0),
        "epl" | "mls" | "soccer" => (1.6, 1.6),
        _ => (10.0, 10.0),
    }
}

/// Logistic scale approximating a normal with standard deviation `sigma`.
fn logistic_scale(sigma: f64) -> f64 {
    sigma * 3f64.sqrt() / std::f64::consts::PI
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Projected probability for one side of one market, if the projection
/// supports that market.
///
/// Spread lines are quoted from the side's own perspective (home -4.5
/// covers when the home margin exceeds 4.5).
pub fn side_probability(
    sport: &str,
    projection: &ModelProjection,
    market_type: MarketType,
    side: Side,
    line: Option<f64>,
) -> Option<f64> {
    let (margin_sigma, total_sigma) = score_sigma(sport);
    let p = match (market_type, side) {
        (MarketType::Moneyline, Side::Home) => projection.home_win_probability,
        (MarketType::Moneyline, Side::Away) => 1.0 - projection.home_win_probability,
        (MarketType::Spread, Side::Home) => {
            logistic((projection.expected_margin? + line?) / logistic_scale(margin_sigma))
        }
        (MarketType::Spread, Side::Away) => {
            logistic((line? - projection.expected_margin?) / logistic_scale(margin_sigma))
        }
        (MarketType::Total, Side::Over) => {
            logistic((projection.expected_total? - line?) / logistic_scale(total_sigma))
        }
        (MarketType::Total, Side::Under) => {
            1.0 - logistic((projection.expected_total? - line?) / logistic_scale(total_sigma))
        }
        // Props need an explicit per-prop projection, which the model does not supply.
        (MarketType::Prop, _) => return None,
        _ => return None,
    };
    Some(p)
}

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Narrowing filters for one generation pass.
#[derive(Debug, Clone, Default)]
pub struct CandidateRequest {
    pub sport: Option<String>,
    pub event_id: Option<String>,
    /// Overrides the configured market types.
    pub market_types: Option<Vec<MarketType>>,
    pub lookahead_hours: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub candidates: Vec<Candidate>,
    pub events_scanned: usize,
    pub quotes_evaluated: usize,
    /// Events whose projection came from the synthetic fallback.
    pub fallback_events: Vec<String>,
    pub degradations: Vec<String>,
}

impl GenerationReport {
    pub fn used_fallback(&self) -> bool {
        !self.fallback_events.is_empty()
    }
}

#[derive(Debug, Default)]
struct EventOutcome {
    candidates: Vec<Candidate>,
    quotes_evaluated: usize,
    fallback: bool,
    degradations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct CandidateGenerator {
    store: Arc<dyn DataStore>,
    projections: Option<Arc<dyn ProjectionService>>,
    synthetic: SyntheticProjector,
    evaluator: PriceEvaluator,
    config: CandidateConfig,
}

impl CandidateGenerator {
    pub fn new(
        store: Arc<dyn DataStore>,
        projections: Option<Arc<dyn ProjectionService>>,
        synthetic: SyntheticProjector,
        config: CandidateConfig,
    ) -> Self {
        let thresholds = EdgeThresholds {
            min_edge_pct: config.min_edge_pct,
            min_probability: config.min_probability,
            max_edge_pct: config.max_edge_pct,
        };
        Self {
            store,
            projections,
            synthetic,
            evaluator: PriceEvaluator::new(
                thresholds,
                KellyCalculator::new(KellyConfig {
                    multiplier: config.kelly_multiplier,
                    max_fraction: config.kelly_max_fraction,
                }),
            ),
            config,
        }
    }

    /// Run one generation pass. Never fails: upstream problems are
    /// recorded as degradations on the report.
    pub async fn generate(&self, request: &CandidateRequest) -> GenerationReport {
        let hours = request.lookahead_hours.unwrap_or(self.config.lookahead_hours);
        let window = LookaheadWindow::starting_now(hours);
        let mut report = GenerationReport::default();

        let events = match self.load_events(&window, request.sport.as_deref()).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Event lookup failed, no candidates generated");
                report.degradations.push(format!("events: {e}"));
                return report;
            }
        };
        let events: Vec<Event> = events
            .into_iter()
            .filter(|e| request.event_id.as_ref().map_or(true, |id| &e.id == id))
            .collect();
        report.events_scanned = events.len();

        let market_types = request
            .market_types
            .clone()
            .unwrap_or_else(|| self.config.market_types.clone());

        let outcomes = join_all(events.iter().map(|e| self.process_event(e, &market_types))).await;

        for (event, outcome) in events.iter().zip(outcomes) {
            if outcome.fallback {
                report.fallback_events.push(event.id.clone());
            }
            report.quotes_evaluated += outcome.quotes_evaluated;
            report.candidates.extend(outcome.candidates);
            report.degradations.extend(outcome.degradations);
        }

        info!(
            events = report.events_scanned,
            quotes = report.quotes_evaluated,
            candidates = report.candidates.len(),
            fallback_events = report.fallback_events.len(),
            "Candidate generation complete"
        );
        report
    }

    /// Scheduled events with a single retry on store failure.
    async fn load_events(
        &self,
        window: &LookaheadWindow,
        sport: Option<&str>,
    ) -> Result<Vec<Event>, EngineError> {
        match self.store.get_scheduled_events(window, sport).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Event lookup failed, retrying once");
                tokio::time::sleep(Duration::from_millis(self.config.projection_retry_backoff_ms)).await;
                self.store.get_scheduled_events(window, sport).await
            }
            result => result,
        }
    }

    /// Best quote with a single retry on store failure.
    async fn load_quote(
        &self,
        event_id: &str,
        market_type: MarketType,
        side: Side,
    ) -> Result<Option<MarketQuote>, EngineError> {
        match self.store.get_best_quote(event_id, market_type, side).await {
            Err(e) if e.is_retryable() => {
                warn!(event = event_id, market = %market_type, side = %side, error = %e, "Quote lookup failed, retrying once");
                tokio::time::sleep(Duration::from_millis(self.config.projection_retry_backoff_ms)).await;
                self.store.get_best_quote(event_id, market_type, side).await
            }
            result => result,
        }
    }

    /// Primary projection with timeout and one retry, else synthetic.
    async fn project(&self, event: &Event) -> (ModelProjection, Option<String>) {
        let Some(service) = &self.projections else {
            return (
                self.synthetic.project_event(event),
                Some(format!("projection: service not configured, {} uses synthetic fallback", event.id)),
            );
        };

        let timeout = Duration::from_millis(self.config.projection_timeout_ms);
        let mut last_error = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.projection_retry_backoff_ms)).await;
            }
            match tokio::time::timeout(timeout, service.project(event)).await {
                Ok(Ok(p)) if p.event_id == event.id => return (p, None),
                Ok(Ok(p)) => last_error = format!("projection returned for {}", p.event_id),
                Ok(Err(e)) => last_error = format!("{e:#}"),
                Err(_) => last_error = format!("timed out after {}ms", timeout.as_millis()),
            }
            warn!(event = %event.id, attempt = attempt + 1, error = %last_error, "Projection failed");
        }

        (
            self.synthetic.project_event(event),
            Some(format!("projection: {} unavailable ({last_error}), using synthetic fallback", event.id)),
        )
    }

    async fn process_event(&self, event: &Event, market_types: &[MarketType]) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        let (projection, degradation) = self.project(event).await;
        outcome.fallback = projection.is_fallback();
        outcome.degradations.extend(degradation);

        let now = Utc::now();
        let max_age = chrono::Duration::minutes(self.config.max_quote_age_mins);

        for &market_type in market_types {
            for &side in market_type.sides() {
                let quote = match self.load_quote(&event.id, market_type, side).await {
                    Ok(Some(q)) => q,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(event = %event.id, market = %market_type, side = %side, error = %e, "Quote lookup failed");
                        outcome
                            .degradations
                            .push(format!("quotes: {} {market_type} {side}: {e}", event.id));
                        continue;
                    }
                };
                if quote.age(now) > max_age {
                    debug!(quote = %quote, "Skipping stale quote");
                    continue;
                }
                let Some(p) = side_probability(&event.sport, &projection, market_type, side, quote.line)
                else {
                    debug!(event = %event.id, market = %market_type, side = %side, "No projection for market");
                    continue;
                };
                outcome.quotes_evaluated += 1;

                match self.evaluator.assess(quote.price, p, projection.source) {
                    Ok(Assessment::Accepted { evaluation, stake_fraction }) => {
                        outcome.candidates.push(Self::build_candidate(
                            event,
                            &quote,
                            &projection,
                            evaluation.implied_probability,
                            p,
                            evaluation.edge_pct,
                            evaluation.confidence,
                            stake_fraction,
                        ));
                    }
                    Ok(Assessment::Rejected { reason, .. }) => {
                        debug!(event = %event.id, market = %market_type, side = %side, reason = %reason, "Candidate filtered");
                    }
                    Err(e) => {
                        debug!(quote = %quote, error = %e, "Quote could not be evaluated");
                    }
                }
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn build_candidate(
        event: &Event,
        quote: &MarketQuote,
        projection: &ModelProjection,
        implied: f64,
        projected: f64,
        edge_pct: f64,
        confidence: crate::types::ConfidenceBand,
        stake_fraction: f64,
    ) -> Candidate {
        let line = quote.line.map(|l| format!(" {l:+}")).unwrap_or_default();
        let mut rationale = format!(
            "{} {}{} at {:+} ({}): projected {:.1}% vs implied {:.1}%, edge {:+.1}%, {} confidence",
            quote.market_type,
            quote.side,
            line,
            quote.price,
            quote.source,
            projected * 100.0,
            implied * 100.0,
            edge_pct,
            confidence,
        );
        if projection.is_fallback() {
            rationale.push_str(" [fallback-sourced projection]");
        }

        Candidate {
            id: Candidate::make_id(&event.id, quote.market_type, quote.side, quote.line),
            event_id: event.id.clone(),
            sport: event.sport.clone(),
            matchup: event.matchup(),
            starts_at: event.starts_at,
            market_type: quote.market_type,
            side: quote.side,
            line: quote.line,
            price: quote.price,
            quote_source: quote.source.clone(),
            implied_probability: implied,
            projected_probability: projected,
            edge_pct,
            confidence,
            stake_fraction,
            projection_source: projection.source,
            model_version: projection.model_version.clone(),
            rationale,
            state: CandidateState::Evaluated,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
