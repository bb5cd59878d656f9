//! Selector / ranker.
//!
//! Chooses the top-N candidates from a pool. The primary path asks the
//! reasoning engine to rank a capped pool and accepts only identifiers
//! that exist in that pool. The fallback path (engine unavailable, zero
//! valid ids, or unparseable output) is a deterministic sort by
//! `edge × confidence weight`, greedily selected under the same
//! diversification rule.

use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SelectorConfig;
use crate::llm::{EngineReply, ReasoningEngine, Turn};
use crate::types::{Candidate, CandidateState, EngineError, MarketType, SelectionMethod};

// ---------------------------------------------------------------------------
// Deterministic ranking
// ---------------------------------------------------------------------------

fn score(c: &Candidate) -> f64 {
    c.edge_pct * c.confidence.weight()
}

/// Total order used by the fallback path: score desc, then edge desc,
/// confidence desc, start time asc, id asc.
fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    score(b)
        .total_cmp(&score(a))
        .then_with(|| b.edge_pct.total_cmp(&a.edge_pct))
        .then_with(|| b.confidence.cmp(&a.confidence))
        .then_with(|| a.starts_at.cmp(&b.starts_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pool sorted best-first.
pub fn rank_deterministic(pool: &[Candidate]) -> Vec<Candidate> {
    let mut ranked = pool.to_vec();
    ranked.sort_by(compare);
    ranked
}

/// Greedy pick in order, skipping repeats of an event+market when
/// diversifying and repeated ids always.
pub fn greedy_select(ranked: &[Candidate], count: usize, diversify: bool) -> Vec<Candidate> {
    let mut taken_ids: HashSet<&str> = HashSet::new();
    let mut taken_groups: HashSet<(&str, MarketType)> = HashSet::new();
    let mut out = Vec::new();
    for c in ranked {
        if out.len() >= count {
            break;
        }
        if taken_ids.contains(c.id.as_str()) {
            continue;
        }
        if diversify && taken_groups.contains(&c.diversity_key()) {
            continue;
        }
        taken_ids.insert(c.id.as_str());
        taken_groups.insert(c.diversity_key());
        out.push(c.clone());
    }
    out
}

/// How many candidates a non-empty pool can yield.
pub fn achievable_count(pool: &[Candidate], requested: usize, diversify: bool) -> usize {
    let available = if diversify {
        pool.iter().map(|c| c.diversity_key()).collect::<HashSet<_>>().len()
    } else {
        pool.iter().map(|c| c.id.as_str()).collect::<HashSet<_>>().len()
    };
    requested.min(available)
}

// ---------------------------------------------------------------------------
// Engine output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SelectionPayload {
    selected: Vec<String>,
}

/// Extract the selected id list from engine text.
///
/// Accepts `{"selected": [...]}` or a bare JSON array, optionally wrapped
/// in prose or a code fence.
pub fn parse_selection(text: &str) -> Result<Vec<String>, EngineError> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(payload) = serde_json::from_str::<SelectionPayload>(&text[start..=end]) {
                return Ok(payload.selected);
            }
        }
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(ids) = serde_json::from_str::<Vec<String>>(&text[start..=end]) {
                return Ok(ids);
            }
        }
    }
    let preview: String = text.chars().take(120).collect();
    Err(EngineError::SelectionParse(format!("no selection list in output: {preview}")))
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Outcome of one selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    pub method: SelectionMethod,
    pub pool_size: usize,
    pub degradations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Selector {
    config: SelectorConfig,
    retry_backoff: Duration,
}

impl Selector {
    pub fn new(config: SelectorConfig, retry_backoff: Duration) -> Self {
        Self { config, retry_backoff }
    }

    /// Pick up to `count` candidates from `pool`.
    pub async fn select(
        &self,
        engine: &dyn ReasoningEngine,
        pool: &[Candidate],
        count: usize,
        diversify: bool,
    ) -> Selection {
        if pool.is_empty() || count == 0 {
            return Selection {
                candidates: Vec::new(),
                method: SelectionMethod::EmptyPool,
                pool_size: pool.len(),
                degradations: Vec::new(),
            };
        }

        let ranked = rank_deterministic(pool);
        let target = achievable_count(&ranked, count, diversify);
        // Only the prompt is capped; count, top-up and fallback use the whole pool.
        // Engine ids are accepted only from what was submitted.
        let submitted = &ranked[..ranked.len().min(self.config.pool_cap)];
        let mut degradations = Vec::new();

        let chosen = match self.ask_engine(engine, submitted, target, diversify).await {
            Ok(ids) => {
                let picked = Self::resolve_ids(&ids, submitted, target, diversify);
                if picked.is_empty() {
                    warn!(returned = ids.len(), "Engine selection had no valid ids, using fallback ranking");
                    degradations.push("selection: engine returned no valid candidate ids".to_string());
                    None
                } else {
                    Some(picked)
                }
            }
            Err(e) => {
                warn!(error = %e, "Engine selection unavailable, using fallback ranking");
                degradations.push(format!("selection: {e}"));
                None
            }
        };

        let (mut candidates, method) = match chosen {
            Some(mut picked) => {
                if picked.len() < target {
                    // Top up from the deterministic order under the same rules.
                    let mut merged = picked.clone();
                    merged.extend(ranked.iter().cloned());
                    picked = greedy_select(&merged, target, diversify);
                }
                (picked, SelectionMethod::Engine)
            }
            None => (greedy_select(&ranked, target, diversify), SelectionMethod::Fallback),
        };

        for c in &mut candidates {
            c.state = CandidateState::Selected;
        }

        info!(
            pool = pool.len(),
            submitted = submitted.len(),
            selected = candidates.len(),
            method = %method,
            "Selection complete"
        );

        Selection {
            candidates,
            method,
            pool_size: pool.len(),
            degradations,
        }
    }

    /// Fallback ranking without consulting the engine, e.g. when the
    /// request deadline leaves no time for it.
    pub fn select_deterministic(&self, pool: &[Candidate], count: usize, diversify: bool, reason: &str) -> Selection {
        if pool.is_empty() || count == 0 {
            return Selection {
                candidates: Vec::new(),
                method: SelectionMethod::EmptyPool,
                pool_size: pool.len(),
                degradations: Vec::new(),
            };
        }
        let ranked = rank_deterministic(pool);
        let target = achievable_count(&ranked, count, diversify);
        let mut candidates = greedy_select(&ranked, target, diversify);
        for c in &mut candidates {
            c.state = CandidateState::Selected;
        }
        Selection {
            candidates,
            method: SelectionMethod::Fallback,
            pool_size: pool.len(),
            degradations: vec![format!("selection: {reason}")],
        }
    }

    /// Keep pool ids in engine order, dropping unknowns, repeats and
    /// diversification conflicts.
    fn resolve_ids(ids: &[String], ranked: &[Candidate], target: usize, diversify: bool) -> Vec<Candidate> {
        let ordered: Vec<Candidate> = ids
            .iter()
            .filter_map(|id| {
                let found = ranked.iter().find(|c| &c.id == id);
                if found.is_none() {
                    debug!(id = %id, "Discarding id not present in pool");
                }
                found.cloned()
            })
            .collect();
        greedy_select(&ordered, target, diversify)
    }

    async fn ask_engine(
        &self,
        engine: &dyn ReasoningEngine,
        ranked: &[Candidate],
        target: usize,
        diversify: bool,
    ) -> Result<Vec<String>, EngineError> {
        let turns = Self::build_prompt(ranked, target, diversify);

        let reply = match engine.converse(&turns, &[]).await {
            Ok(reply) => reply,
            Err(first) => {
                warn!(error = %first, "Selection call failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                engine
                    .converse(&turns, &[])
                    .await
                    .map_err(|e| EngineError::upstream("reasoning-engine", format!("{e:#}")))?
            }
        };

        match reply {
            EngineReply::FinalAnswer(text) => parse_selection(&text),
            EngineReply::ToolCallBatch { .. } => Err(EngineError::SelectionParse(
                "engine requested tools during selection".to_string(),
            )),
        }
    }

    fn build_prompt(ranked: &[Candidate], target: usize, diversify: bool) -> Vec<Turn> {
        let pool: Vec<serde_json::Value> = ranked
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "matchup": c.matchup,
                    "starts_at": c.starts_at.to_rfc3339(),
                    "market_type": c.market_type,
                    "side": c.side,
                    "line": c.line,
                    "price": c.price,
                    "implied_probability": (c.implied_probability * 1000.0).round() / 1000.0,
                    "projected_probability": (c.projected_probability * 1000.0).round() / 1000.0,
                    "edge_pct": (c.edge_pct * 100.0).round() / 100.0,
                    "confidence": c.confidence,
                    "fallback_sourced": c.is_fallback_sourced(),
                })
            })
            .collect();

        let diversity_rule = if diversify {
            "Never pick two candidates from the same event and market type."
        } else {
            "Multiple picks from the same event and market are allowed."
        };

        let system = format!(
            "You rank sports wagering candidates. Pick exactly {target} candidate(s) from the pool, \
             best first, weighing edge, confidence and data quality. {diversity_rule} \
             Only use ids that appear in the pool. Respond with JSON only: {{\"selected\": [\"<id>\", ...]}}"
        );
        let pool_json = serde_json::to_string(&pool).unwrap_or_else(|_| "[]".to_string());

        vec![Turn::system(system), Turn::user(format!("Candidate pool:\n{pool_json}"))]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;
    use crate::types::{ConfidenceBand, ProjectionSource, Side};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    fn cand(id: &str, event: &str, market: MarketType, edge: f64, band: ConfidenceBand) -> Candidate {
        Candidate {
            id: id.into(),
            event_id: event.into(),
            sport: "nba".into(),
            matchup: "A @ B".into(),
            starts_at: Utc::now() + ChronoDuration::hours(3),
            market_type: market,
            side: Side::Home,
            line: None,
            price: -110,
            quote_source: "book".into(),
            implied_probability: 0.5238,
            projected_probability: 0.6,
            edge_pct: edge,
            confidence: band,
            stake_fraction: 0.01,
            projection_source: ProjectionSource::Primary,
            model_version: "v1".into(),
            rationale: String::new(),
            state: CandidateState::Evaluated,
        }
    }

    fn pool() -> Vec<Candidate> {
        vec![
            cand("a", "e1", MarketType::Moneyline, 10.0, ConfidenceBand::Medium), // 7.5
            cand("b", "e1", MarketType::Moneyline, 12.0, ConfidenceBand::Low),    // 6.0
            cand("c", "e2", MarketType::Total, 6.0, ConfidenceBand::High),        // 6.0
            cand("d", "e3", MarketType::Spread, 4.0, ConfidenceBand::High),       // 4.0
        ]
    }

    struct Scripted(Result<String, String>);

    #[async_trait]
    impl ReasoningEngine for Scripted {
        async fn converse(&self, _t: &[Turn], _d: &[ToolDefinition]) -> anyhow::Result<EngineReply> {
            match &self.0 {
                Ok(text) => Ok(EngineReply::FinalAnswer(text.clone())),
                Err(e) => anyhow::bail!("{e}"),
            }
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn selector() -> Selector {
        Selector::new(SelectorConfig::default(), Duration::from_millis(1))
    }

    fn ids(cs: &[Candidate]) -> Vec<&str> {
        cs.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_rank_deterministic_ties() {
        let ranked = rank_deterministic(&pool());
        // b and c tie on score 6.0; b has the larger edge
        assert_eq!(ids(&ranked), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_greedy_diversification() {
        let ranked = rank_deterministic(&pool());
        assert_eq!(ids(&greedy_select(&ranked, 3, true)), vec!["a", "c", "d"]);
        assert_eq!(ids(&greedy_select(&ranked, 3, false)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_selection_variants() {
        assert_eq!(parse_selection(r#"{"selected":["a","c"]}"#).unwrap(), vec!["a", "c"]);
        assert_eq!(
            parse_selection("Here you go:\n```json\n{\"selected\": [\"d\"]}\n```").unwrap(),
            vec!["d"]
        );
        assert_eq!(parse_selection(r#"["b"]"#).unwrap(), vec!["b"]);
        assert!(matches!(parse_selection("I like the Heat"), Err(EngineError::SelectionParse(_))));
    }

    #[tokio::test]
    async fn test_engine_path_discards_unknown_ids() {
        let engine = Scripted(Ok(r#"{"selected":["zzz","d","c"]}"#.into()));
        let sel = selector().select(&engine, &pool(), 2, true).await;
        assert_eq!(sel.method, SelectionMethod::Engine);
        assert_eq!(ids(&sel.candidates), vec!["d", "c"]);
        assert!(sel.candidates.iter().all(|c| c.state == CandidateState::Selected));
    }

    #[tokio::test]
    async fn test_engine_path_tops_up_short_answers() {
        let engine = Scripted(Ok(r#"{"selected":["d"]}"#.into()));
        let sel = selector().select(&engine, &pool(), 3, true).await;
        assert_eq!(sel.method, SelectionMethod::Engine);
        assert_eq!(ids(&sel.candidates), vec!["d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_malformed_output_matches_fallback() {
        let engine = Scripted(Ok("not json at all".into()));
        let sel = selector().select(&engine, &pool(), 2, true).await;
        assert_eq!(sel.method, SelectionMethod::Fallback);
        let expected = greedy_select(&rank_deterministic(&pool()), 2, true);
        assert_eq!(ids(&sel.candidates), ids(&expected));
        assert!(!sel.degradations.is_empty());
    }

    #[tokio::test]
    async fn test_engine_down_uses_fallback() {
        let engine = Scripted(Err("503".into()));
        let sel = selector().select(&engine, &pool(), 5, true).await;
        assert_eq!(sel.method, SelectionMethod::Fallback);
        // only three distinct event+market groups exist
        assert_eq!(sel.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_pool_flagged() {
        let engine = Scripted(Ok(r#"{"selected":[]}"#.into()));
        let sel = selector().select(&engine, &[], 3, true).await;
        assert_eq!(sel.method, SelectionMethod::EmptyPool);
        assert!(sel.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_pool_cap_applied() {
        let big: Vec<Candidate> = (0..60)
            .map(|i| cand(&format!("c{i}"), &format!("e{i}"), MarketType::Moneyline, 3.0 + i as f64, ConfidenceBand::Medium))
            .collect();
        let engine = Scripted(Ok(r#"{"selected":["c0"]}"#.into()));
        let sel = selector().select(&engine, &big, 1, true).await;
        // c0 has the lowest score and falls outside the 40-candidate cap
        assert_eq!(sel.method, SelectionMethod::Fallback);
        assert_eq!(ids(&sel.candidates), vec!["c59"]);
    }

    #[tokio::test]
    async fn test_count_is_not_limited_by_pool_cap() {
        let wide: Vec<Candidate> = (0..5)
            .map(|i| cand(&format!("w{i}"), &format!("e{i}"), MarketType::Moneyline, 5.0 + i as f64, ConfidenceBand::Medium))
            .collect();
        let capped = Selector::new(SelectorConfig { pool_cap: 2, ..SelectorConfig::default() }, Duration::from_millis(1));

        let engine = Scripted(Ok(r#"{"selected":["w4"]}"#.into()));
        let sel = capped.select(&engine, &wide, 4, true).await;
        assert_eq!(sel.method, SelectionMethod::Engine);
        assert_eq!(ids(&sel.candidates), vec!["w4", "w3", "w2", "w1"]);

        let fallback = capped.select(&Scripted(Err("down".into())), &wide, 4, true).await;
        assert_eq!(fallback.method, SelectionMethod::Fallback);
        assert_eq!(fallback.candidates.len(), 4);

        let direct = capped.select_deterministic(&wide, 4, true, "deadline");
        assert_eq!(direct.candidates.len(), 4);
    }
}
