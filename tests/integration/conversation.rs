//! Conversational path: bounded tool rounds, streaming order, tool wiring.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;

use handicapper::config::FallbackConfig;
use handicapper::data::projections::SyntheticProjector;
use handicapper::data::NewsDigest;
use handicapper::engine::generator::CandidateGenerator;
use handicapper::engine::orchestrator::Orchestrator;
use handicapper::engine::ChatRequest;
use handicapper::llm::EngineReply;
use handicapper::storage::{DataStore, MemoryStore};
use handicapper::tools::builtin::{builtin_registry, BuiltinDeps};
use handicapper::types::{CandidateState, StreamEvent, TerminationReason};

use crate::support::{
    fixed_projections, no_injuries, recommender, seeded_store, test_config, tool_call, MockNews,
    ScriptedEngine, ToolHungryEngine,
};

#[tokio::test]
async fn endless_tool_requests_stop_at_the_cap() {
    let store = Arc::new(MemoryStore::new());
    let rec = recommender(Arc::new(ToolHungryEngine), store.clone(), None);

    let record = assert_ok!(
        rec.chat(ChatRequest {
            id: Some("chat-1".into()),
            message: "Anything worth betting tonight?".into(),
            deadline_ms: None,
        })
        .await
    );

    assert_eq!(record.metadata.termination, Some(TerminationReason::MaxTurnsExceeded));
    assert!(!record.rationale.trim().is_empty());
    assert!(record.metadata.tools_used.contains(&"search_news".to_string()));
    assert_eq!(record.metadata.model_version, "tool-hungry");
    assert!(store.get_recommendation("chat-1").await.unwrap().is_some());
}

#[tokio::test]
async fn tool_results_are_fed_back_in_request_order() {
    let store: Arc<dyn DataStore> = seeded_store().await;
    let config = test_config();
    let generator = Arc::new(CandidateGenerator::new(
        store.clone(),
        None,
        SyntheticProjector::new(&FallbackConfig::default()),
        config.candidates.clone(),
    ));

    let mut news = MockNews::new();
    news.expect_search()
        .withf(|q| q == "Celtics injuries")
        .times(1)
        .returning(|q| {
            Ok(NewsDigest {
                query: q.to_string(),
                headlines: Vec::new(),
                sentiment: 0.1,
                source: "mock".into(),
            })
        });

    let registry = builtin_registry(
        &config.tools,
        BuiltinDeps {
            news: Arc::new(news),
            injuries: Arc::new(no_injuries()),
            store: store.clone(),
            generator,
            default_lookahead_hours: 48,
        },
    )
    .unwrap();
    let orchestrator = Orchestrator::new(Arc::new(registry), config.engine.clone());

    let engine = ScriptedEngine::new(vec![
        Ok(EngineReply::ToolCallBatch {
            preamble: None,
            calls: vec![
                tool_call("a", "get_scheduled_events", json!({})),
                tool_call("b", "search_news", json!({"query": "Celtics injuries"})),
                tool_call("c", "get_best_odds", json!({"event_id": "evt-e", "market_type": "moneyline", "side": "home"})),
            ],
        }),
        Ok(EngineReply::FinalAnswer("Celtics -150 is fair value.".into())),
    ]);

    let outcome = orchestrator
        .run(&engine, "Celtics tonight?", Instant::now() + Duration::from_secs(5))
        .await;

    assert_eq!(outcome.termination, TerminationReason::FinalAnswer);
    let ids: Vec<&str> = outcome.tool_calls.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(outcome.tool_calls.iter().all(|r| r.is_ok()));
    assert_eq!(outcome.tool_calls[2].result["data"]["price"], -150);
}

#[tokio::test]
async fn stream_emits_tools_then_content_then_complete() {
    let store = seeded_store().await;
    let engine = ScriptedEngine::new(vec![
        Ok(EngineReply::ToolCallBatch {
            preamble: Some("Let me price tonight's slate.".into()),
            calls: vec![
                tool_call("v1", "find_value_bets", json!({"sport": "nba"})),
                tool_call("n1", "search_news", json!({"query": "Boston Celtics"})),
            ],
        }),
        Ok(EngineReply::FinalAnswer(
            "Best value: evt-e:moneyline:home (Celtics -150, 10% edge, Medium confidence).".into(),
        )),
    ]);
    let rec = recommender(
        Arc::new(engine),
        store,
        Some(Arc::new(fixed_projections(0.66))),
    );

    let mut rx = rec
        .chat_stream(ChatRequest {
            id: Some("stream-1".into()),
            message: "What should I bet tonight?".into(),
            deadline_ms: Some(5_000),
        })
        .unwrap();

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(&kinds[..5], &["thinking", "tool_start", "tool_start", "tool_end", "tool_end"]);
    assert_eq!(kinds.last(), Some(&"complete"));
    let content_kinds = &kinds[5..kinds.len() - 1];
    assert!(!content_kinds.is_empty());
    assert!(content_kinds.iter().all(|k| *k == "content"));

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    let Some(StreamEvent::Complete { recommendation }) = events.last() else {
        panic!("stream did not end with complete");
    };
    assert_eq!(recommendation.id, "stream-1");
    assert_eq!(streamed, recommendation.rationale);
    assert_eq!(recommendation.candidates.len(), 1);
    assert_eq!(recommendation.candidates[0].id, "evt-e:moneyline:home");
    assert_eq!(recommendation.candidates[0].state, CandidateState::Persisted);
    assert_eq!(
        recommendation.metadata.tools_used,
        vec!["find_value_bets".to_string(), "search_news".to_string()]
    );
}

#[tokio::test]
async fn engine_outage_yields_canned_answer_not_error() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(ScriptedEngine::new(vec![]));
    let rec = recommender(engine.clone(), store, None);

    let record = assert_ok!(
        rec.chat(ChatRequest {
            id: None,
            message: "Hi".into(),
            deadline_ms: None,
        })
        .await
    );
    assert!(record.metadata.empty);
    assert!(matches!(record.metadata.termination, Some(TerminationReason::Error { .. })));
    // One call plus one retry
    assert_eq!(engine.calls(), 2);
}
