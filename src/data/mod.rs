//! External data collaborators.
//!
//! Defines the read-only collaborator traits the engine depends on (news,
//! injuries, projections) and the payload types they return. HTTP
//! implementations live in the submodules, together with the synthetic
//! projector used when the projection service is unavailable.

pub mod injuries;
pub mod news;
pub mod projections;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Event, ModelProjection};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Result of one news search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub query: String,
    pub headlines: Vec<Headline>,
    /// Keyword sentiment over the headlines, -1.0 to +1.0.
    pub sentiment: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryEntry {
    pub player: String,
    /// Feed status, e.g. "Out", "Questionable".
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub team: String,
    pub sport: String,
    pub players: Vec<InjuryEntry>,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Headline search. Read-only and retry-safe.
#[async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<NewsDigest>;
}

/// Injury report lookup. Read-only and retry-safe.
#[async_trait]
pub trait InjuryLookup: Send + Sync {
    async fn lookup(&self, team: &str, sport: &str) -> Result<InjuryReport>;
}

/// Statistical projection for one event.
#[async_trait]
pub trait ProjectionService: Send + Sync {
    async fn project(&self, event: &Event) -> Result<ModelProjection>;
}
