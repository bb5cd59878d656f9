//! Pricing properties: implied probability, edge, bands and the pre-filter.

use tokio_test::{assert_err, assert_ok};

use handicapper::strategy::edge::{self, EdgeEvaluation, EdgeThresholds, FilterRejection};
use handicapper::types::{ConfidenceBand, ProjectionSource};

fn evaluation(edge_pct: f64, projected_probability: f64) -> EdgeEvaluation {
    EdgeEvaluation {
        price: -110,
        implied_probability: projected_probability / (1.0 + edge_pct / 100.0),
        projected_probability,
        edge_pct,
        confidence: edge::confidence_band(projected_probability, ProjectionSource::Primary),
    }
}

#[test]
fn implied_probability_reference_prices() {
    assert!((edge::implied_probability(150).unwrap() - 0.4).abs() < 1e-12);
    assert!((edge::implied_probability(-150).unwrap() - 0.6).abs() < 1e-12);
    assert!((edge::implied_probability(100).unwrap() - 0.5).abs() < 1e-12);
    assert_err!(edge::implied_probability(0));
    assert_err!(edge::implied_probability(-99));
}

#[test]
fn edge_is_pure_and_deterministic() {
    let prices = [-400, -250, -150, -110, 100, 130, 150, 240, 600];
    let probabilities = [0.05, 0.3, 0.5, 0.61, 0.66, 0.8, 0.95];
    for &price in &prices {
        for &p in &probabilities {
            let first = assert_ok!(edge::evaluate(price, p, ProjectionSource::Primary));
            for _ in 0..3 {
                let again = assert_ok!(edge::evaluate(price, p, ProjectionSource::Primary));
                assert_eq!(first, again);
            }
            // Re-derivable from (price, probability) alone
            let implied = edge::implied_probability(price).unwrap();
            assert_eq!(first.implied_probability, implied);
            assert_eq!(first.edge_pct, edge::edge_pct(p, implied));
        }
    }
}

#[test]
fn confidence_bands_and_fallback_cap() {
    assert_eq!(edge::confidence_band(0.59, ProjectionSource::Primary), ConfidenceBand::Low);
    assert_eq!(edge::confidence_band(0.66, ProjectionSource::Primary), ConfidenceBand::Medium);
    assert_eq!(edge::confidence_band(0.80, ProjectionSource::Primary), ConfidenceBand::High);
    assert_eq!(edge::confidence_band(0.80, ProjectionSource::Fallback), ConfidenceBand::Medium);
}

#[test]
fn prefilter_reference_cases() {
    let thresholds = EdgeThresholds {
        min_edge_pct: 3.0,
        min_probability: 0.55,
        max_edge_pct: 30.0,
    };

    // edge 2% under a 3% threshold
    assert!(matches!(
        thresholds.check(&evaluation(2.0, 0.62)),
        Err(FilterRejection::EdgeBelowMinimum { .. })
    ));
    // edge 5% but probability 50% under a 55% floor
    assert!(matches!(
        thresholds.check(&evaluation(5.0, 0.50)),
        Err(FilterRejection::ProbabilityBelowFloor { .. })
    ));
    // edge 5% at 60%
    assert_ok!(thresholds.check(&evaluation(5.0, 0.60)));
    // implausible artifact
    assert!(matches!(
        thresholds.check(&evaluation(45.0, 0.70)),
        Err(FilterRejection::ImplausibleEdge { .. })
    ));
}

#[test]
fn home_minus_150_at_66_percent() {
    let e = assert_ok!(edge::evaluate(-150, 0.66, ProjectionSource::Primary));
    assert!((e.implied_probability - 0.6).abs() < 1e-12);
    assert!((e.edge_pct - 10.0).abs() < 1e-9);
    assert_eq!(e.confidence, ConfidenceBand::Medium);
    assert_ok!(EdgeThresholds::default().check(&e));
}
