//! Injury report provider.
//!
//! Uses API-Sports to resolve a team by name and pull its current injury
//! list. Each supported league maps to its own API-Sports host.
//!
//! API: `https://v1.<sport>.api-sports.io/` (per-sport hosts)
//! Auth: `x-apisports-key` header. Free tier: 100 req/day.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{InjuryEntry, InjuryLookup, InjuryReport};

// ---------------------------------------------------------------------------
// Supported leagues
// ---------------------------------------------------------------------------

struct SportHost {
    keys: &'static [&'static str],
    host: &'static str,
}

const SPORT_HOSTS: &[SportHost] = &[
    SportHost { keys: &["nfl", "ncaaf", "american_football"], host: "https://v1.american-football.api-sports.io" },
    SportHost { keys: &["nba", "ncaab", "basketball"], host: "https://v1.basketball.api-sports.io" },
    SportHost { keys: &["mlb", "baseball"], host: "https://v1.baseball.api-sports.io" },
    SportHost { keys: &["nhl", "hockey"], host: "https://v1.hockey.api-sports.io" },
    SportHost { keys: &["epl", "mls", "soccer", "football"], host: "https://v3.football.api-sports.io" },
];

fn host_for(sport: &str) -> Option<&'static str> {
    let s = sport.to_lowercase();
    SPORT_HOSTS
        .iter()
        .find(|h| h.keys.contains(&s.as_str()))
        .map(|h| h.host)
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiSportsResponse {
    #[serde(default)]
    errors: Value,
    #[serde(default)]
    response: Vec<Value>,
}

impl ApiSportsResponse {
    /// API-Sports reports errors in-band as a non-empty object or array.
    fn error_message(&self) -> Option<String> {
        match &self.errors {
            Value::Object(m) if !m.is_empty() => Some(Value::Object(m.clone()).to_string()),
            Value::Array(a) if !a.is_empty() => Some(Value::Array(a.clone()).to_string()),
            _ => None,
        }
    }
}

fn str_at<'a>(v: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| {
        let mut cur = v;
        for key in *path {
            cur = cur.get(key)?;
        }
        cur.as_str()
    })
}

/// Extract the team id from a `/teams?search=` response.
fn parse_team_id(items: &[Value]) -> Option<i64> {
    items.iter().find_map(|item| {
        item.get("team")
            .and_then(|t| t.get("id"))
            .or_else(|| item.get("id"))
            .and_then(Value::as_i64)
    })
}

fn parse_injuries(items: &[Value]) -> Vec<InjuryEntry> {
    items
        .iter()
        .filter_map(|item| {
            let player = str_at(item, &[&["player", "name"]])?.to_string();
            let status = str_at(item, &[&["player", "type"], &["status"], &["player", "status"]])
                .unwrap_or("Unknown")
                .to_string();
            let reason = str_at(item, &[&["player", "reason"], &["description"], &["reason"]])
                .map(str::to_string);
            Some(InjuryEntry { player, status, reason })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct ApiSportsInjuries {
    http: Client,
    api_key: Option<String>,
}

impl ApiSportsInjuries {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("HANDICAPPER/0.1.0")
            .build()
            .context("Failed to build injuries HTTP client")?;
        Ok(Self { http, api_key })
    }

    async fn get(&self, key: &str, url: &str) -> Result<Vec<Value>> {
        let resp = self
            .http
            .get(url)
            .header("x-apisports-key", key)
            .send()
            .await
            .with_context(|| format!("API-Sports request failed: {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("API-Sports returned {status}");
        }
        let body: ApiSportsResponse = resp
            .json()
            .await
            .context("Failed to parse API-Sports response")?;
        if let Some(err) = body.error_message() {
            anyhow::bail!("API-Sports error: {err}");
        }
        Ok(body.response)
    }
}

#[async_trait]
impl InjuryLookup for ApiSportsInjuries {
    async fn lookup(&self, team: &str, sport: &str) -> Result<InjuryReport> {
        let Some(key) = &self.api_key else {
            anyhow::bail!("Injury lookup unavailable: API_SPORTS_KEY not configured");
        };
        let host = host_for(sport)
            .with_context(|| format!("Injury lookup not supported for sport '{sport}'"))?;

        let teams = self
            .get(key, &format!("{host}/teams?search={}", urlencoding::encode(team)))
            .await?;
        let team_id = parse_team_id(&teams)
            .with_context(|| format!("Team not found: {team}"))?;

        let injuries = self.get(key, &format!("{host}/injuries?team={team_id}")).await?;
        let players = parse_injuries(&injuries);

        debug!(team, sport, team_id, injured = players.len(), "Injury lookup complete");

        Ok(InjuryReport {
            team: team.to_string(),
            sport: sport.to_lowercase(),
            players,
            source: "api-sports".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
