//! Strategy layer: edge evaluation, stake hints and selection.

pub mod edge;
pub mod kelly;
pub mod selector;

use tracing::debug;

use crate::types::{EngineError, ProjectionSource};
use edge::{EdgeEvaluation, EdgeThresholds, FilterRejection};
use kelly::KellyCalculator;

/// Outcome of pricing one quote against one projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// Survived the pre-filter; carries the evaluation and stake hint.
    Accepted {
        evaluation: EdgeEvaluation,
        stake_fraction: f64,
    },
    Rejected {
        evaluation: EdgeEvaluation,
        reason: FilterRejection,
    },
}

impl Assessment {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Assessment::Accepted { .. })
    }
}

/// Pipelines edge evaluation → pre-filter → Kelly stake hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceEvaluator {
    thresholds: EdgeThresholds,
    kelly: KellyCalculator,
}

impl PriceEvaluator {
    pub fn new(thresholds: EdgeThresholds, kelly: KellyCalculator) -> Self {
        Self { thresholds, kelly }
    }

    /// Errors only on an invalid price or an out-of-range probability.
    pub fn assess(
        &self,
        price: i32,
        projected_probability: f64,
        source: ProjectionSource,
    ) -> Result<Assessment, EngineError> {
        let evaluation = edge::evaluate(price, projected_probability, source)?;
        match self.thresholds.check(&evaluation) {
            Ok(()) => Ok(Assessment::Accepted {
                evaluation,
                stake_fraction: self.kelly.stake_fraction(price, projected_probability),
            }),
            Err(reason) => {
                debug!(price, reason = %reason, "Pre-filter rejected price");
                Ok(Assessment::Rejected { evaluation, reason })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_and_sizes() {
        let ev = PriceEvaluator::default();
        match ev.assess(-150, 0.66, ProjectionSource::Primary).unwrap() {
            Assessment::Accepted { evaluation, stake_fraction } => {
                assert!((evaluation.edge_pct - 10.0).abs() < 1e-9);
                assert!((stake_fraction - 0.0375).abs() < 1e-9);
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_rejection_carries_reason() {
        let ev = PriceEvaluator::default();
        // -150 with 0.612 → edge 2%
        let a = ev.assess(-150, 0.612, ProjectionSource::Primary).unwrap();
        assert!(matches!(
            a,
            Assessment::Rejected { reason: FilterRejection::EdgeBelowMinimum { .. }, .. }
        ));
        assert!(!a.is_accepted());
    }

    #[test]
    fn test_invalid_price_is_error() {
        assert!(PriceEvaluator::default().assess(0, 0.6, ProjectionSource::Primary).is_err());
    }
}
