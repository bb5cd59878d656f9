//! Structured path end to end: store → projections → generator →
//! selector → assembler → persisted record.

use std::sync::Arc;
use tokio_test::assert_ok;

use handicapper::config::FallbackConfig;
use handicapper::data::projections::SyntheticProjector;
use handicapper::engine::generator::{CandidateGenerator, CandidateRequest};
use handicapper::engine::RecommendationRequest;
use handicapper::llm::offline::OfflineEngine;
use handicapper::llm::EngineReply;
use handicapper::storage::{DataStore, SqliteStore};
use handicapper::strategy::selector::rank_deterministic;
use handicapper::types::*;

use crate::support::{
    event, fixed_projections, quote, recommender, seeded_store, test_config, MalformedEngine,
    MockProjections, ScriptedEngine,
};

#[tokio::test]
async fn home_minus_150_survives_and_is_ranked() {
    let store = seeded_store().await;
    let config = test_config();
    let generator = CandidateGenerator::new(
        store,
        Some(Arc::new(fixed_projections(0.66))),
        SyntheticProjector::new(&FallbackConfig::default()),
        config.candidates.clone(),
    );

    let report = generator.generate(&CandidateRequest::default()).await;
    assert_eq!(report.events_scanned, 1);
    assert!(report.fallback_events.is_empty());

    let ranked = rank_deterministic(&report.candidates);
    assert_eq!(ranked.len(), 1, "away side at +130 with 34% must be filtered");
    let home = &ranked[0];
    assert_eq!(home.side, Side::Home);
    assert_eq!(home.price, -150);
    assert!((home.implied_probability - 0.6).abs() < 1e-12);
    assert!((home.edge_pct - 10.0).abs() < 1e-9);
    assert_eq!(home.confidence, ConfidenceBand::Medium);
    assert_eq!(home.projection_source, ProjectionSource::Primary);
    assert!(home.stake_fraction > 0.0);
}

#[tokio::test]
async fn structured_request_with_engine_selection() {
    let store = seeded_store().await;
    let engine = ScriptedEngine::new(vec![Ok(EngineReply::FinalAnswer(
        r#"{"selected": ["evt-e:moneyline:home"]}"#.to_string(),
    ))]);
    let rec = recommender(Arc::new(engine), store.clone(), Some(Arc::new(fixed_projections(0.66))));

    let record = assert_ok!(
        rec.recommend(RecommendationRequest {
            id: Some("rec-e2e".into()),
            count: Some(3),
            ..Default::default()
        })
        .await
    );

    assert_eq!(record.kind, RecommendationKind::Structured);
    assert_eq!(record.candidates.len(), 1);
    assert_eq!(record.metadata.selection_method, Some(SelectionMethod::Engine));
    assert_eq!(record.metadata.model_version, "scripted-v1");
    assert_eq!(record.confidence_band, ConfidenceBand::Medium);
    assert!(!record.metadata.fallback_sourced);
    assert!(!record.metadata.empty);

    let stored = store.get_recommendation("rec-e2e").await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn malformed_engine_still_yields_a_record() {
    let store = seeded_store().await;
    let rec = recommender(Arc::new(MalformedEngine), store, Some(Arc::new(fixed_projections(0.66))));

    let record = assert_ok!(rec.recommend(RecommendationRequest::default()).await);
    assert_eq!(record.metadata.selection_method, Some(SelectionMethod::Fallback));
    assert_eq!(record.candidates.len(), 1);
    assert!(record.metadata.degradations.iter().any(|d| d.starts_with("selection:")));
}

#[tokio::test]
async fn projection_outage_is_retried_then_labelled() {
    let store = seeded_store().await;
    let mut projections = MockProjections::new();
    projections
        .expect_project()
        .times(2)
        .returning(|_| Err(anyhow::anyhow!("projection service 503")));

    let config = test_config();
    let mut fallback = FallbackConfig::default();
    fallback.ratings.insert("Boston Celtics".into(), 1650.0);
    fallback.ratings.insert("Miami Heat".into(), 1500.0);
    let generator = CandidateGenerator::new(
        store,
        Some(Arc::new(projections)),
        SyntheticProjector::new(&fallback),
        config.candidates.clone(),
    );

    let report = generator.generate(&CandidateRequest::default()).await;
    assert_eq!(report.fallback_events, vec!["evt-e".to_string()]);
    assert!(report.degradations.iter().any(|d| d.contains("synthetic")));

    // 215 Elo points with home advantage puts the Celtics near 77.5%,
    // a High band on primary data that the fallback label caps at Medium.
    let home = report
        .candidates
        .iter()
        .find(|c| c.side == Side::Home)
        .expect("home candidate from synthetic projection");
    assert!(home.is_fallback_sourced());
    assert_eq!(home.confidence, ConfidenceBand::Medium);
    assert_eq!(home.model_version, "synthetic-elo-v1");
}

#[tokio::test]
async fn empty_slate_is_flagged_not_an_error() {
    let store = Arc::new(handicapper::storage::MemoryStore::new());
    let rec = recommender(Arc::new(OfflineEngine), store, None);

    let record = assert_ok!(rec.recommend(RecommendationRequest::default()).await);
    assert!(record.metadata.empty);
    assert!(record.candidates.is_empty());
    assert_eq!(record.confidence_band, ConfidenceBand::Low);
    assert_eq!(record.metadata.selection_method, Some(SelectionMethod::EmptyPool));
}

#[tokio::test]
async fn sqlite_round_trip_and_last_write_wins() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store
        .insert_event(&event("evt-s", "Denver Nuggets", "Utah Jazz", 5))
        .await
        .unwrap();
    store
        .insert_quote(&quote("evt-s", MarketType::Moneyline, Side::Home, -150, None))
        .await
        .unwrap();

    let rec = recommender(Arc::new(OfflineEngine), store.clone(), Some(Arc::new(fixed_projections(0.66))));
    let first = assert_ok!(
        rec.recommend(RecommendationRequest { id: Some("same-id".into()), ..Default::default() })
            .await
    );
    assert_eq!(first.candidates.len(), 1);

    let second = assert_ok!(
        rec.recommend(RecommendationRequest {
            id: Some("same-id".into()),
            sport: Some("nhl".into()),
            ..Default::default()
        })
        .await
    );
    assert!(second.candidates.is_empty());

    let stored = store.get_recommendation("same-id").await.unwrap().unwrap();
    assert!(stored.candidates.is_empty());
    assert_eq!(stored.metadata.created_at, second.metadata.created_at);
}

#[tokio::test]
async fn validation_errors_surface() {
    let rec = recommender(
        Arc::new(OfflineEngine),
        Arc::new(handicapper::storage::MemoryStore::new()),
        None,
    );
    let err = rec
        .recommend(RecommendationRequest { count: Some(0), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
