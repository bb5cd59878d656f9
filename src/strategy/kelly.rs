//! Kelly criterion stake hints.
//!
//! Computes a fractional-Kelly stake, as a fraction of bankroll, from the
//! quoted price and projected probability. The engine never places bets;
//! the fraction is attached to each candidate as guidance and, like the
//! edge, is re-derivable from `(price, projected_probability)`.

use rust_decimal::prelude::*;
use tracing::debug;

use super::edge::decimal_odds;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone, Copy)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly). Lower = more conservative.
    pub multiplier: f64,
    /// Maximum stake as a fraction of bankroll.
    pub max_fraction: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.25,
            max_fraction: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Raw Kelly fraction.
    ///
    /// f* = (bp - q) / b, where b = net odds, p = win probability, q = 1 - p.
    /// Returns 0.0 for invalid prices or non-positive Kelly.
    pub fn raw_fraction(price: i32, probability: f64) -> f64 {
        let Ok(decimal) = decimal_odds(price) else {
            return 0.0;
        };
        let b = (decimal - Decimal::ONE).to_f64().unwrap_or(0.0);
        if b <= 0.0 {
            return 0.0;
        }
        let kelly = (b * probability - (1.0 - probability)) / b;
        kelly.max(0.0)
    }

    /// Fractional, capped stake hint.
    pub fn stake_fraction(&self, price: i32, probability: f64) -> f64 {
        let raw = Self::raw_fraction(price, probability);
        let capped = (raw * self.config.multiplier).min(self.config.max_fraction);

        debug!(
            price,
            raw_kelly = format!("{:.2}%", raw * 100.0),
            stake = format!("{:.2}%", capped * 100.0),
            "Stake hint sized"
        );

        capped
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_kelly_even_money() {
        // +100, p = 0.55 → b = 1, f* = 0.55 - 0.45 = 0.10
        assert!((KellyCalculator::raw_fraction(100, 0.55) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_raw_kelly_favourite() {
        // -150, p = 0.66 → b = 2/3, f* = (0.44 - 0.34) / (2/3) = 0.15
        assert!((KellyCalculator::raw_fraction(-150, 0.66) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_negative_kelly_is_zero() {
        assert_eq!(KellyCalculator::raw_fraction(-150, 0.5), 0.0);
    }

    #[test]
    fn test_invalid_price_is_zero() {
        assert_eq!(KellyCalculator::raw_fraction(40, 0.9), 0.0);
    }

    #[test]
    fn test_stake_fraction_applies_multiplier_and_cap() {
        let calc = KellyCalculator::default();
        // 0.15 * 0.25 = 0.0375, under the 5% cap
        assert!((calc.stake_fraction(-150, 0.66) - 0.0375).abs() < 1e-9);
        // +300 with p = 0.5 → f* = (1.5 - 0.5)/3 = 0.333 → 0.083 → capped at 0.05
        assert!((calc.stake_fraction(300, 0.5) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_configured_multiplier_and_cap() {
        let calc = KellyCalculator::new(KellyConfig { multiplier: 1.0, max_fraction: 0.12 });
        assert!((calc.stake_fraction(-150, 0.66) - 0.12).abs() < 1e-9);
        assert!((calc.stake_fraction(100, 0.55) - 0.10).abs() < 1e-9);
    }
}
