//! Edge evaluation.
//!
//! Pure, network-free conversions from a market price plus a projected
//! probability into implied probability, percentage edge and a confidence
//! band. Every stored candidate value can be re-derived from
//! `(price, projected_probability)` with these functions alone.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ConfidenceBand, EngineError, MarketQuote, ProjectionSource};

// ---------------------------------------------------------------------------
// Thresholds (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// Projected probability at or above which a band is at least Medium.
pub const MEDIUM_BAND_FLOOR: f64 = 0.60;
/// Projected probability above which a band is High.
pub const HIGH_BAND_FLOOR: f64 = 0.75;

/// Pre-filter applied to freshly evaluated candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeThresholds {
    /// Minimum percentage edge (e.g. 3.0 = 3%).
    pub min_edge_pct: f64,
    /// Minimum projected probability (e.g. 0.55).
    pub min_probability: f64,
    /// Edges above this are implausible artifacts of stale or bad quotes.
    pub max_edge_pct: f64,
}

impl Default for EdgeThresholds {
    fn default() -> Self {
        Self {
            min_edge_pct: 3.0,
            min_probability: 0.55,
            max_edge_pct: 30.0,
        }
    }
}

/// Why an evaluation failed the pre-filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterRejection {
    EdgeBelowMinimum { edge_pct: f64, min: f64 },
    ProbabilityBelowFloor { probability: f64, floor: f64 },
    ImplausibleEdge { edge_pct: f64, max: f64 },
}

impl std::fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterRejection::EdgeBelowMinimum { edge_pct, min } => {
                write!(f, "edge {edge_pct:.2}% below minimum {min:.2}%")
            }
            FilterRejection::ProbabilityBelowFloor { probability, floor } => {
                write!(f, "probability {:.1}% below floor {:.1}%", probability * 100.0, floor * 100.0)
            }
            FilterRejection::ImplausibleEdge { edge_pct, max } => {
                write!(f, "edge {edge_pct:.2}% above plausibility cap {max:.2}%")
            }
        }
    }
}

impl EdgeThresholds {
    /// Apply the minimum-edge, minimum-probability and artifact checks.
    pub fn check(&self, eval: &EdgeEvaluation) -> Result<(), FilterRejection> {
        if eval.edge_pct < self.min_edge_pct {
            return Err(FilterRejection::EdgeBelowMinimum {
                edge_pct: eval.edge_pct,
                min: self.min_edge_pct,
            });
        }
        if eval.projected_probability < self.min_probability {
            return Err(FilterRejection::ProbabilityBelowFloor {
                probability: eval.projected_probability,
                floor: self.min_probability,
            });
        }
        if eval.edge_pct > self.max_edge_pct {
            return Err(FilterRejection::ImplausibleEdge {
                edge_pct: eval.edge_pct,
                max: self.max_edge_pct,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core conversions
// ---------------------------------------------------------------------------

fn validate_price(price: i32) -> Result<(), EngineError> {
    if price >= 100 || price <= -100 {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "American price {price} is not a valid quote (must be >= +100 or <= -100)"
        )))
    }
}

/// Win probability a price represents at zero bookmaker margin.
///
/// `+150 → 100/250 = 0.4`, `-150 → 150/250 = 0.6`.
pub fn implied_probability(price: i32) -> Result<f64, EngineError> {
    validate_price(price)?;
    let p = f64::from(price);
    if price >= 100 {
        Ok(100.0 / (p + 100.0))
    } else {
        Ok(-p / (-p + 100.0))
    }
}

/// Decimal (European) odds: total return per unit staked.
pub fn decimal_odds(price: i32) -> Result<Decimal, EngineError> {
    validate_price(price)?;
    let p = Decimal::from(price);
    if price >= 100 {
        Ok(Decimal::ONE + p / dec!(100))
    } else {
        Ok(Decimal::ONE + dec!(100) / -p)
    }
}

/// Percentage by which the projection exceeds the implied probability.
pub fn edge_pct(projected_probability: f64, implied_probability: f64) -> f64 {
    (projected_probability - implied_probability) / implied_probability * 100.0
}

/// `{Low <60%, Medium 60–75%, High >75%}`, capped at Medium for
/// fallback-sourced projections.
pub fn confidence_band(projected_probability: f64, source: ProjectionSource) -> ConfidenceBand {
    let band = if projected_probability > HIGH_BAND_FLOOR {
        ConfidenceBand::High
    } else if projected_probability >= MEDIUM_BAND_FLOOR {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    };
    match source {
        ProjectionSource::Fallback => band.min(ConfidenceBand::Medium),
        ProjectionSource::Primary => band,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Result of evaluating one price against one projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvaluation {
    pub price: i32,
    pub implied_probability: f64,
    pub projected_probability: f64,
    pub edge_pct: f64,
    pub confidence: ConfidenceBand,
}

/// Evaluate a price against a projected probability.
pub fn evaluate(
    price: i32,
    projected_probability: f64,
    source: ProjectionSource,
) -> Result<EdgeEvaluation, EngineError> {
    if !(projected_probability > 0.0 && projected_probability < 1.0) {
        return Err(EngineError::Validation(format!(
            "Projected probability {projected_probability} must be in (0, 1)"
        )));
    }
    let implied = implied_probability(price)?;
    let edge = edge_pct(projected_probability, implied);
    let confidence = confidence_band(projected_probability, source);

    debug!(
        price,
        implied = format!("{:.1}%", implied * 100.0),
        projected = format!("{:.1}%", projected_probability * 100.0),
        edge = format!("{:+.2}%", edge),
        band = %confidence,
        "Edge evaluated"
    );

    Ok(EdgeEvaluation {
        price,
        implied_probability: implied,
        projected_probability,
        edge_pct: edge,
        confidence,
    })
}

// ---------------------------------------------------------------------------
// Quote selection
// ---------------------------------------------------------------------------

/// Deterministically choose the best (max-payout) quote.
///
/// Only quotes on the current line (the line of the most recently fetched
/// quote) compete. Ties on payout prefer the feed's best-odds flag, then
/// the freshest quote, then the source name.
pub fn select_best_quote(quotes: &[MarketQuote]) -> Option<&MarketQuote> {
    let current_line = quotes
        .iter()
        .max_by(|a, b| a.fetched_at.cmp(&b.fetched_at).then_with(|| b.source.cmp(&a.source)))?
        .line;

    quotes
        .iter()
        .filter(|q| q.line == current_line)
        .filter_map(|q| decimal_odds(q.price).ok().map(|d| (d, q)))
        .max_by(|(da, a), (db, b)| {
            da.cmp(db)
                .then_with(|| a.is_best.cmp(&b.is_best))
                .then_with(|| a.fetched_at.cmp(&b.fetched_at))
                .then_with(|| b.source.cmp(&a.source))
        })
        .map(|(_, q)| q)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
