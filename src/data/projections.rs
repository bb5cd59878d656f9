//! Projection providers.
//!
//! `HttpProjectionClient` calls the external projection service.
//! `SyntheticProjector` is the deterministic fallback: a static strength
//! table plus a fixed home-advantage constant, converted to a win
//! probability with the Elo logistic curve. Its output is always labelled
//! `fallback-sourced` and carries no margin or total projection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use super::ProjectionService;
use crate::config::FallbackConfig;
use crate::types::{Event, ModelProjection, ProjectionSource};

pub const SYNTHETIC_MODEL_VERSION: &str = "synthetic-elo-v1";

/// Self-reported confidence stamped on synthetic projections.
const SYNTHETIC_CONFIDENCE: f64 = 0.3;

// ---------------------------------------------------------------------------
// HTTP projection service
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProjectionRequest<'a> {
    event_id: &'a str,
    sport: &'a str,
    home: &'a str,
    away: &'a str,
    starts_at: String,
}

pub struct HttpProjectionClient {
    http: Client,
    base_url: String,
}

impl HttpProjectionClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .user_agent("HANDICAPPER/0.1.0")
            .build()
            .context("Failed to build projection HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Reject projections that don't belong to the event or aren't probabilities.
    fn check(event: &Event, projection: &ModelProjection) -> Result<()> {
        if projection.event_id != event.id {
            anyhow::bail!(
                "Projection event mismatch: asked for {}, got {}",
                event.id,
                projection.event_id
            );
        }
        let p = projection.home_win_probability;
        if !(p > 0.0 && p < 1.0) {
            anyhow::bail!("Projection home_win_probability {p} out of range");
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionService for HttpProjectionClient {
    async fn project(&self, event: &Event) -> Result<ModelProjection> {
        let url = format!("{}/project", self.base_url);
        let request = ProjectionRequest {
            event_id: &event.id,
            sport: &event.sport,
            home: &event.home,
            away: &event.away,
            starts_at: event.starts_at.to_rfc3339(),
        };

        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Projection request failed for {}", event.id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Projection service error {status}: {body}");
        }

        let mut projection: ModelProjection = resp
            .json()
            .await
            .context("Failed to parse projection response")?;
        // The service is primary by definition; never trust a self-applied label.
        projection.source = ProjectionSource::Primary;
        Self::check(event, &projection)?;

        debug!(
            event = %event.id,
            p_home = format!("{:.3}", projection.home_win_probability),
            model = %projection.model_version,
            "Projection received"
        );
        Ok(projection)
    }
}

// ---------------------------------------------------------------------------
// Synthetic fallback
// ---------------------------------------------------------------------------

/// Built-in strength table (Elo-style ratings, 1500 = league average).
const BASE_RATINGS: &[(&str, f64)] = &[
    // NBA
    ("Boston Celtics", 1660.0),
    ("Oklahoma City Thunder", 1670.0),
    ("Denver Nuggets", 1600.0),
    ("Cleveland Cavaliers", 1620.0),
    ("New York Knicks", 1590.0),
    ("Milwaukee Bucks", 1560.0),
    ("Los Angeles Lakers", 1540.0),
    ("Miami Heat", 1510.0),
    ("Golden State Warriors", 1530.0),
    ("Detroit Pistons", 1420.0),
    ("Washington Wizards", 1350.0),
    // NFL
    ("Kansas City Chiefs", 1640.0),
    ("Philadelphia Eagles", 1630.0),
    ("Baltimore Ravens", 1620.0),
    ("Buffalo Bills", 1610.0),
    ("Detroit Lions", 1600.0),
    ("San Francisco 49ers", 1570.0),
    ("Dallas Cowboys", 1500.0),
    ("New York Giants", 1400.0),
    ("Carolina Panthers", 1380.0),
];

#[derive(Debug, Clone)]
pub struct SyntheticProjector {
    ratings: HashMap<String, f64>,
    home_advantage: f64,
    default_rating: f64,
}

impl SyntheticProjector {
    /// Built-in table with configured overrides layered on top.
    pub fn new(config: &FallbackConfig) -> Self {
        let mut ratings: HashMap<String, f64> = BASE_RATINGS
            .iter()
            .map(|(team, r)| (team.to_lowercase(), *r))
            .collect();
        for (team, r) in &config.ratings {
            ratings.insert(team.to_lowercase(), *r);
        }
        Self {
            ratings,
            home_advantage: config.home_advantage,
            default_rating: config.default_rating,
        }
    }

    pub fn rating(&self, team: &str) -> f64 {
        self.ratings
            .get(&team.to_lowercase())
            .copied()
            .unwrap_or(self.default_rating)
    }

    /// `p_home = 1 / (1 + 10^(-(r_home + hfa - r_away) / 400))`
    pub fn home_win_probability(&self, home: &str, away: &str) -> f64 {
        let diff = self.rating(home) + self.home_advantage - self.rating(away);
        1.0 / (1.0 + 10f64.powf(-diff / 400.0))
    }

    pub fn project_event(&self, event: &Event) -> ModelProjection {
        ModelProjection {
            event_id: event.id.clone(),
            home_win_probability: self.home_win_probability(&event.home, &event.away),
            expected_margin: None,
            expected_total: None,
            confidence: SYNTHETIC_CONFIDENCE,
            model_version: SYNTHETIC_MODEL_VERSION.to_string(),
            source: ProjectionSource::Fallback,
        }
    }
}

#[async_trait]
impl ProjectionService for SyntheticProjector {
    async fn project(&self, event: &Event) -> Result<ModelProjection> {
        Ok(self.project_event(event))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> SyntheticProjector {
        SyntheticProjector::new(&FallbackConfig::default())
    }

    #[test]
    fn test_equal_teams_home_advantage_only() {
        let p = projector();
        let prob = p.home_win_probability("Unknown A", "Unknown B");
        // 65 points of home advantage ≈ 59.2%
        assert!((prob - 0.5925).abs() < 0.001, "got {prob}");
    }

    #[test]
    fn test_rating_lookup_case_insensitive() {
        let p = projector();
        assert_eq!(p.rating("boston celtics"), 1660.0);
        assert_eq!(p.rating("Nobody FC"), 1500.0);
    }

    #[test]
    fn test_config_overrides_table() {
        let mut cfg = FallbackConfig::default();
        cfg.ratings.insert("Miami Heat".into(), 1700.0);
        let p = SyntheticProjector::new(&cfg);
        assert_eq!(p.rating("Miami Heat"), 1700.0);
        assert!(p.home_win_probability("Miami Heat", "Boston Celtics") > 0.5);
    }

    #[test]
    fn test_projection_is_labelled_fallback() {
        let event = Event::sample();
        let proj = projector().project_event(&event);
        assert!(proj.is_fallback());
        assert_eq!(proj.model_version, SYNTHETIC_MODEL_VERSION);
        assert!(proj.expected_margin.is_none());
        // Deterministic across calls
        assert_eq!(proj, projector().project_event(&event));
    }

    #[test]
    fn test_http_check_rejects_mismatch() {
        let event = Event::sample();
        let mut proj = projector().project_event(&event);
        proj.event_id = "other".into();
        assert!(HttpProjectionClient::check(&event, &proj).is_err());
        proj.event_id = event.id.clone();
        proj.home_win_probability = 1.0;
        assert!(HttpProjectionClient::check(&event, &proj).is_err());
    }
}
