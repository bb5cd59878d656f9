//! Core engine: candidate generation, conversation orchestration,
//! selection and record assembly behind one `Recommender` facade.
//!
//! Two request paths share the same collaborators:
//! - structured: generate → select → assemble → persist
//! - conversational: orchestrate (tool rounds) → assemble → persist,
//!   optionally streamed as `StreamEvent`s.

pub mod assembler;
pub mod generator;
pub mod orchestrator;

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::llm::ReasoningEngine;
use crate::storage::DataStore;
use crate::strategy::selector::Selector;
use crate::tools::ToolRegistry;
use crate::types::{EngineError, MarketType, Recommendation, StreamEvent};
use assembler::{Assembler, AuditStamp};
use generator::{CandidateGenerator, CandidateRequest, GenerationReport};
use orchestrator::Orchestrator;

/// Longest accepted chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4_000;

const STREAM_BUFFER: usize = 64;

/// Structured recommendation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendationRequest {
    /// Caller-supplied id; re-using one overwrites the earlier record.
    pub id: Option<String>,
    pub sport: Option<String>,
    pub event_id: Option<String>,
    pub market_type: Option<MarketType>,
    pub count: Option<usize>,
    pub lookahead_hours: Option<u32>,
    pub diversify: Option<bool>,
    pub deadline_ms: Option<u64>,
}

/// Conversational request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub id: Option<String>,
    pub message: String,
    pub deadline_ms: Option<u64>,
}

fn validate_id(id: Option<&str>) -> Result<(), EngineError> {
    match id {
        Some(id) if id.trim().is_empty() => Err(EngineError::Validation("id must not be empty".into())),
        Some(id) if id.len() > 128 => Err(EngineError::Validation("id must be at most 128 characters".into())),
        _ => Ok(()),
    }
}

fn validate_deadline(deadline_ms: Option<u64>) -> Result<(), EngineError> {
    if deadline_ms == Some(0) {
        return Err(EngineError::Validation("deadline_ms must be positive".into()));
    }
    Ok(())
}

fn record_id(id: Option<String>) -> String {
    id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub struct Recommender {
    engine: Arc<dyn ReasoningEngine>,
    store: Arc<dyn DataStore>,
    generator: Arc<CandidateGenerator>,
    selector: Selector,
    orchestrator: Orchestrator,
    assembler: Assembler,
    config: AppConfig,
}

impl Recommender {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        store: Arc<dyn DataStore>,
        generator: Arc<CandidateGenerator>,
        registry: Arc<ToolRegistry>,
        config: AppConfig,
    ) -> Self {
        let backoff = Duration::from_millis(config.engine.engine_retry_backoff_ms);
        Self {
            selector: Selector::new(config.selector.clone(), backoff),
            orchestrator: Orchestrator::new(registry, config.engine.clone()),
            assembler: Assembler::new(store.clone(), backoff),
            engine,
            store,
            generator,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    fn deadline(&self, requested_ms: Option<u64>) -> Instant {
        Instant::now() + Duration::from_millis(requested_ms.unwrap_or(self.config.engine.default_deadline_ms))
    }

    pub fn validate_recommendation(&self, req: &RecommendationRequest) -> Result<(), EngineError> {
        validate_id(req.id.as_deref())?;
        validate_deadline(req.deadline_ms)?;
        if let Some(count) = req.count {
            if count == 0 || count > self.config.selector.max_count {
                return Err(EngineError::Validation(format!(
                    "count must be between 1 and {}",
                    self.config.selector.max_count
                )));
            }
        }
        if req.lookahead_hours == Some(0) {
            return Err(EngineError::Validation("lookahead_hours must be positive".into()));
        }
        if req.sport.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(EngineError::Validation("sport must not be empty".into()));
        }
        Ok(())
    }

    pub fn validate_chat(&self, req: &ChatRequest) -> Result<(), EngineError> {
        validate_id(req.id.as_deref())?;
        validate_deadline(req.deadline_ms)?;
        if req.message.trim().is_empty() {
            return Err(EngineError::Validation("message must not be empty".into()));
        }
        if req.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::Validation(format!(
                "message must be at most {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(())
    }

    /// Structured path. Only validation errors are returned; everything
    /// else degrades into a labelled record.
    pub async fn recommend(&self, req: RecommendationRequest) -> Result<Recommendation, EngineError> {
        self.validate_recommendation(&req)?;
        let started = std::time::Instant::now();
        let deadline = self.deadline(req.deadline_ms);
        let id = record_id(req.id.clone());
        let count = req.count.unwrap_or(self.config.selector.default_count);
        let diversify = req.diversify.unwrap_or(self.config.selector.diversify);

        let gen_request = CandidateRequest {
            sport: req.sport.clone(),
            event_id: req.event_id.clone(),
            market_types: req.market_type.map(|m| vec![m]),
            lookahead_hours: req.lookahead_hours,
        };
        let report = match timeout_at(deadline, self.generator.generate(&gen_request)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(id = %id, "Deadline expired during candidate generation");
                GenerationReport {
                    degradations: vec!["deadline: expired during candidate generation".to_string()],
                    ..GenerationReport::default()
                }
            }
        };

        let selection = match timeout_at(
            deadline,
            self.selector.select(self.engine.as_ref(), &report.candidates, count, diversify),
        )
        .await
        {
            Ok(selection) => selection,
            Err(_) => {
                warn!(id = %id, "Deadline expired during selection, using fallback ranking");
                self.selector
                    .select_deterministic(&report.candidates, count, diversify, "deadline expired")
            }
        };

        let mut tools_used = vec!["candidate_generator".to_string()];
        if report.used_fallback() {
            tools_used.push("synthetic_projection".to_string());
        }
        if selection.method == crate::types::SelectionMethod::Engine {
            tools_used.push("engine_selector".to_string());
        }

        info!(
            id = %id,
            pool = report.candidates.len(),
            selected = selection.candidates.len(),
            method = %selection.method,
            "Structured request resolved"
        );

        let stamp = AuditStamp {
            tools_used,
            model_version: self.engine.model_name().to_string(),
            started,
            degradations: report.degradations,
        };
        Ok(self
            .assembler
            .assemble_structured(id, selection, report.fallback_events.len(), stamp)
            .await)
    }

    /// Conversational path, blocking until the answer is complete.
    pub async fn chat(&self, req: ChatRequest) -> Result<Recommendation, EngineError> {
        self.validate_chat(&req)?;
        let started = std::time::Instant::now();
        let deadline = self.deadline(req.deadline_ms);
        let id = record_id(req.id);

        let outcome = self.orchestrator.run(self.engine.as_ref(), &req.message, deadline).await;
        let stamp = AuditStamp {
            tools_used: Vec::new(),
            model_version: self.engine.model_name().to_string(),
            started,
            degradations: Vec::new(),
        };
        Ok(self.assembler.assemble_conversational(id, outcome, stamp).await)
    }

    /// Conversational path as an event stream. Validation happens before
    /// the task is spawned; the stream always ends with `complete`.
    pub fn chat_stream(self: &Arc<Self>, req: ChatRequest) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
        self.validate_chat(&req)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let deadline = this.deadline(req.deadline_ms);
            let id = record_id(req.id);

            let outcome = this
                .orchestrator
                .run_streaming(this.engine.as_ref(), &req.message, deadline, &tx)
                .await;
            let stamp = AuditStamp {
                tools_used: Vec::new(),
                model_version: this.engine.model_name().to_string(),
                started,
                degradations: Vec::new(),
            };
            let record = this.assembler.assemble_conversational(id, outcome, stamp).await;
            if tx.send(StreamEvent::Complete { recommendation: Box::new(record) }).await.is_err() {
                warn!("Stream closed before completion was delivered");
            }
        });

        Ok(rx)
    }

    pub async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, EngineError> {
        validate_id(Some(id))?;
        self.store.get_recommendation(id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
