//! Selector guarantees over generated pools.

use std::collections::HashSet;
use std::time::Duration;

use handicapper::config::SelectorConfig;
use handicapper::llm::EngineReply;
use handicapper::strategy::selector::{greedy_select, rank_deterministic, Selector};
use handicapper::types::{Candidate, ConfidenceBand, MarketType, SelectionMethod};

use crate::support::{candidate, MalformedEngine, ScriptedEngine};

fn selector() -> Selector {
    Selector::new(SelectorConfig::default(), Duration::from_millis(1))
}

/// Deterministic pseudo-random pool: several events, repeated markets,
/// varied edges and bands.
fn pool(size: usize, seed: u64) -> Vec<Candidate> {
    let markets = [MarketType::Moneyline, MarketType::Spread, MarketType::Total];
    let bands = [ConfidenceBand::Low, ConfidenceBand::Medium, ConfidenceBand::High];
    let mut state = seed;
    (0..size)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let r = (state >> 33) as usize;
            candidate(
                &format!("c{i}"),
                &format!("e{}", r % 5),
                markets[(r / 5) % 3],
                3.0 + (r % 170) as f64 / 10.0,
                bands[(r / 7) % 3],
            )
        })
        .collect()
}

fn assert_selection_rules(pool: &[Candidate], picked: &[Candidate], requested: usize) {
    assert!(picked.len() <= requested);
    let ids: HashSet<&str> = pool.iter().map(|c| c.id.as_str()).collect();
    let mut groups = HashSet::new();
    for c in picked {
        assert!(ids.contains(c.id.as_str()), "{} not in pool", c.id);
        assert!(groups.insert(c.diversity_key()), "duplicate event+market {:?}", c.diversity_key());
    }
}

#[tokio::test]
async fn fallback_respects_count_pool_and_diversity() {
    for seed in 1..20u64 {
        let pool = pool(12, seed);
        for requested in [1, 3, 5, 20] {
            let sel = selector().select(&MalformedEngine, &pool, requested, true).await;
            assert_selection_rules(&pool, &sel.candidates, requested);
        }
    }
}

#[tokio::test]
async fn malformed_output_equals_deterministic_fallback() {
    for seed in 1..10u64 {
        let pool = pool(15, seed);
        let sel = selector().select(&MalformedEngine, &pool, 4, true).await;
        assert_eq!(sel.method, SelectionMethod::Fallback);

        let expected = greedy_select(&rank_deterministic(&pool), 4, true);
        let got: Vec<&str> = sel.candidates.iter().map(|c| c.id.as_str()).collect();
        let want: Vec<&str> = expected.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(got, want);
    }
}

#[tokio::test]
async fn unknown_ids_are_never_trusted() {
    let pool = pool(8, 7);
    let known = pool[3].id.clone();
    let engine = ScriptedEngine::new(vec![Ok(EngineReply::FinalAnswer(format!(
        r#"{{"selected": ["ghost-1", "{known}", "ghost-2"]}}"#
    )))]);
    let sel = selector().select(&engine, &pool, 2, false).await;
    assert_eq!(sel.method, SelectionMethod::Engine);
    assert_eq!(sel.candidates[0].id, known);
    assert_eq!(sel.candidates.len(), 2);
    assert!(sel.candidates.iter().all(|c| !c.id.starts_with("ghost")));
}

#[tokio::test]
async fn only_unknown_ids_fall_back() {
    let pool = pool(6, 3);
    let engine = ScriptedEngine::new(vec![Ok(EngineReply::FinalAnswer(
        r#"["nope", "also-nope"]"#.to_string(),
    ))]);
    let sel = selector().select(&engine, &pool, 2, true).await;
    assert_eq!(sel.method, SelectionMethod::Fallback);
    assert!(!sel.degradations.is_empty());
}

#[tokio::test]
async fn returns_min_of_count_and_pool() {
    let small = pool(2, 11);
    let sel = selector().select(&MalformedEngine, &small, 5, false).await;
    assert_eq!(sel.candidates.len(), 2);
}

#[tokio::test]
async fn empty_pool_is_flagged_not_an_error() {
    let sel = selector().select(&MalformedEngine, &[], 3, true).await;
    assert_eq!(sel.method, SelectionMethod::EmptyPool);
    assert!(sel.candidates.is_empty());
}
