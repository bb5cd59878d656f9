//! Recommendation assembler.
//!
//! Turns a selection (structured path) or a conversation outcome
//! (conversational path) into the persisted `Recommendation`. Audit
//! metadata is stamped on every record, including aborted and fallback
//! ones, and persistence failures degrade to an unpersisted record rather
//! than an error.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::orchestrator::ConversationOutcome;
use crate::storage::DataStore;
use crate::strategy::selector::Selection;
use crate::types::{
    Candidate, CandidateState, ConfidenceBand, Recommendation, RecommendationKind,
    RecommendationMetadata, SelectionMethod,
};

/// Aggregate band: the weakest selected candidate, `Low` when empty.
pub fn aggregate_band(candidates: &[Candidate]) -> ConfidenceBand {
    candidates
        .iter()
        .map(|c| c.confidence)
        .min()
        .unwrap_or(ConfidenceBand::Low)
}

/// Candidates produced by tools during the conversation whose ids the
/// answer cites, deduplicated in first-seen order.
pub fn referenced_candidates(outcome: &ConversationOutcome) -> Vec<Candidate> {
    let mut found: Vec<Candidate> = Vec::new();
    for record in &outcome.tool_calls {
        let Some(output) = &record.output else { continue };
        for c in output.candidates() {
            if cites(&outcome.answer, &c.id) && !found.iter().any(|f| f.id == c.id) {
                found.push(c.clone());
            }
        }
    }
    found
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':')
}

/// True if `id` appears in `text` as a whole token, not inside a longer id.
/// A `.` followed by a digit continues a line value (`:221` vs `:221.5`).
fn cites(text: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    text.match_indices(id).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let mut rest = text[start + id.len()..].chars();
        let continues = match rest.next() {
            Some('.') => rest.next().is_some_and(|c| c.is_ascii_digit()),
            Some(c) => is_id_char(c),
            None => false,
        };
        !before.is_some_and(is_id_char) && !continues
    })
}

/// Everything stamped on a record besides its candidates and rationale.
#[derive(Debug, Clone)]
pub struct AuditStamp {
    pub tools_used: Vec<String>,
    pub model_version: String,
    pub started: Instant,
    pub degradations: Vec<String>,
}

pub struct Assembler {
    store: Arc<dyn DataStore>,
    retry_backoff: Duration,
}

impl Assembler {
    pub fn new(store: Arc<dyn DataStore>, retry_backoff: Duration) -> Self {
        Self { store, retry_backoff }
    }

    pub async fn assemble_structured(
        &self,
        id: String,
        selection: Selection,
        fallback_events: usize,
        stamp: AuditStamp,
    ) -> Recommendation {
        let candidates = selection.candidates;
        let rationale = Self::structured_rationale(&candidates, selection.method, selection.pool_size, fallback_events);
        let mut degradations = stamp.degradations.clone();
        degradations.extend(selection.degradations);

        let record = Recommendation {
            id,
            kind: RecommendationKind::Structured,
            confidence_band: aggregate_band(&candidates),
            rationale,
            metadata: RecommendationMetadata {
                tools_used: dedup(stamp.tools_used),
                processing_time_ms: 0,
                model_version: stamp.model_version,
                confidence_band: aggregate_band(&candidates),
                selection_method: Some(selection.method),
                termination: None,
                fallback_sourced: candidates.iter().any(|c| c.is_fallback_sourced()),
                empty: candidates.is_empty(),
                degradations,
                created_at: Utc::now(),
            },
            candidates,
        };
        self.persist(record, stamp.started).await
    }

    pub async fn assemble_conversational(
        &self,
        id: String,
        outcome: ConversationOutcome,
        stamp: AuditStamp,
    ) -> Recommendation {
        let mut candidates = if outcome.aborted {
            Vec::new()
        } else {
            referenced_candidates(&outcome)
        };
        for c in &mut candidates {
            c.state = CandidateState::Selected;
        }

        let mut tools_used = stamp.tools_used.clone();
        tools_used.extend(outcome.tools_used());
        let mut degradations = stamp.degradations.clone();
        degradations.extend(outcome.degradations);

        let band = if outcome.aborted {
            ConfidenceBand::Low
        } else {
            aggregate_band(&candidates)
        };

        let record = Recommendation {
            id,
            kind: RecommendationKind::Conversational,
            confidence_band: band,
            rationale: outcome.answer,
            metadata: RecommendationMetadata {
                tools_used: dedup(tools_used),
                processing_time_ms: 0,
                model_version: stamp.model_version,
                confidence_band: band,
                selection_method: None,
                termination: Some(outcome.termination),
                fallback_sourced: candidates.iter().any(|c| c.is_fallback_sourced()),
                empty: outcome.aborted,
                degradations,
                created_at: Utc::now(),
            },
            candidates,
        };
        self.persist(record, stamp.started).await
    }

    fn structured_rationale(
        candidates: &[Candidate],
        method: SelectionMethod,
        pool_size: usize,
        fallback_events: usize,
    ) -> String {
        if candidates.is_empty() {
            return "No candidates cleared the edge and probability thresholds in the lookahead window. \
                    Low confidence: no recommendation."
                .to_string();
        }

        let mut lines = vec![format!(
            "Selected {} of {} candidate(s) ({}).",
            candidates.len(),
            pool_size,
            match method {
                SelectionMethod::Engine => "ranked by reasoning engine",
                SelectionMethod::Fallback => "deterministic edge x confidence ranking",
                SelectionMethod::EmptyPool => "empty pool",
            }
        )];
        for (i, c) in candidates.iter().enumerate() {
            lines.push(format!("{}. {}: {}", i + 1, c.matchup, c.rationale));
        }
        if fallback_events > 0 {
            lines.push(format!(
                "{fallback_events} event(s) priced from the synthetic rating model (fallback-sourced)."
            ));
        }
        lines.join("\n")
    }

    /// Stamp processing time and upsert with one retry. On failure the
    /// record is still returned, flagged as unpersisted.
    async fn persist(&self, mut record: Recommendation, started: Instant) -> Recommendation {
        record.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        for c in &mut record.candidates {
            c.state = CandidateState::Persisted;
        }

        let mut result = self.store.upsert_recommendation(&record).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                warn!(id = %record.id, error = %e, "Persisting recommendation failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                result = self.store.upsert_recommendation(&record).await;
            }
        }

        match result {
            Ok(()) => info!(record = %record, "Recommendation persisted"),
            Err(e) => {
                error!(id = %record.id, error = %e, "Recommendation could not be persisted");
                for c in &mut record.candidates {
                    c.state = CandidateState::Selected;
                }
                record.metadata.degradations.push(format!("storage: not persisted ({e})"));
            }
        }
        record
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for n in names {
        if !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
