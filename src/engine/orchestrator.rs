//! Conversation orchestrator.
//!
//! Drives one conversation through a bounded state machine:
//!
//! ```text
//! Start → AwaitingModel → {ToolRequested → ExecutingTools → AwaitingModel}* → Finalized | Aborted
//! ```
//!
//! Once `max_tool_rounds` rounds have executed the engine is called with no
//! tool definitions, which forces a final answer. Every engine call and
//! every tool batch runs under the request deadline; on expiry in-flight
//! work is dropped and the conversation aborts with a canned answer.
//!
//! The streaming variant runs the same machine and reports progress on an
//! mpsc channel. Tool status events always precede the final content.

use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::llm::{chunk_text, EngineReply, ReasoningEngine, ToolCallRequest, ToolDefinition, Turn};
use crate::tools::{ToolCallRecord, ToolRegistry};
use crate::types::{EngineError, StreamEvent, TerminationReason};

/// Safe answer used whenever a conversation cannot produce one of its own.
pub const CANNED_ANSWER: &str = "I couldn't complete the analysis for this request right now, \
so I'm not making a recommendation. Please try again shortly.";

const ENGINE_SERVICE: &str = "reasoning_engine";

/// Result of one conversation, degraded or not.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub answer: String,
    pub termination: TerminationReason,
    /// Every executed call, in request order across rounds.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Transcript length when the conversation ended.
    pub turns: usize,
    pub rounds: u32,
    /// True when `answer` is the canned response.
    pub aborted: bool,
    pub degradations: Vec<String>,
}

impl ConversationOutcome {
    /// Distinct tool names in first-use order.
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.tool_calls {
            if !names.contains(&record.name) {
                names.push(record.name.clone());
            }
        }
        names
    }
}

enum ConversationState {
    Start,
    AwaitingModel,
    ToolRequested {
        preamble: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    ExecutingTools {
        calls: Vec<ToolCallRequest>,
    },
    Finalized {
        answer: String,
        termination: TerminationReason,
    },
    Aborted {
        termination: TerminationReason,
    },
}

/// Optional progress channel; send failures mean the client went away.
#[derive(Clone, Copy)]
struct Sink<'a>(Option<&'a mpsc::Sender<StreamEvent>>);

impl Sink<'_> {
    async fn emit(&self, event: StreamEvent) {
        if let Some(tx) = self.0 {
            if tx.send(event).await.is_err() {
                debug!("Stream receiver dropped");
            }
        }
    }

    fn is_streaming(&self) -> bool {
        self.0.is_some()
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Blocking conversation: returns once the machine reaches a terminal state.
    pub async fn run(
        &self,
        engine: &dyn ReasoningEngine,
        message: &str,
        deadline: Instant,
    ) -> ConversationOutcome {
        self.drive(engine, message, deadline, Sink(None)).await
    }

    /// Streaming conversation: same machine, with progress sent on `tx`.
    /// The caller emits `complete` after assembling the record.
    pub async fn run_streaming(
        &self,
        engine: &dyn ReasoningEngine,
        message: &str,
        deadline: Instant,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> ConversationOutcome {
        self.drive(engine, message, deadline, Sink(Some(tx))).await
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a sports betting analyst. Today is {}.\n\
             Use the available tools to look up scheduled events, prices, injuries and news \
             before recommending anything. Only recommend bets backed by a positive edge \
             against a specific quoted price, and cite candidates by their id.\n\
             Projections labelled fallback-sourced come from a simple rating model; say so \
             whenever you rely on one. If the data does not support a bet, say that plainly.\n\
             Available tools: {}.",
            Utc::now().format("%Y-%m-%d"),
            self.registry.names().join(", "),
        );
        if let Some(extra) = self.config.system_prompt_extra.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
        prompt
    }

    async fn drive(
        &self,
        engine: &dyn ReasoningEngine,
        message: &str,
        deadline: Instant,
        sink: Sink<'_>,
    ) -> ConversationOutcome {
        let definitions = self.registry.definitions();
        let max_rounds = self.config.max_tool_rounds;
        let mut turns: Vec<Turn> = Vec::new();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut degradations: Vec<String> = Vec::new();
        // Text the engine produced alongside tool requests, kept for the forced final.
        let mut interim = String::new();
        let mut rounds = 0u32;
        let mut state = ConversationState::Start;

        loop {
            state = match state {
                ConversationState::Start => {
                    turns.push(Turn::system(self.system_prompt()));
                    turns.push(Turn::user(message));
                    sink.emit(StreamEvent::Thinking { message: "Analyzing your request".to_string() })
                        .await;
                    ConversationState::AwaitingModel
                }

                ConversationState::AwaitingModel => {
                    let forced_final = rounds >= max_rounds;
                    let tools: &[ToolDefinition] = if forced_final { &[] } else { &definitions };

                    if forced_final && sink.is_streaming() {
                        match self.stream_final(engine, &turns, deadline, sink, &mut degradations).await {
                            Some(answer) => {
                                // Content has already been emitted.
                                return self.finish(
                                    answer,
                                    TerminationReason::MaxTurnsExceeded,
                                    false,
                                    records,
                                    turns.len(),
                                    rounds,
                                    degradations,
                                );
                            }
                            None => debug!("Streamed final turn unavailable, falling back to a buffered call"),
                        }
                    }

                    match self.call_engine(engine, &turns, tools, deadline).await {
                        Ok(EngineReply::FinalAnswer(text)) if !text.trim().is_empty() => {
                            let termination = if forced_final {
                                TerminationReason::MaxTurnsExceeded
                            } else {
                                TerminationReason::FinalAnswer
                            };
                            ConversationState::Finalized { answer: text, termination }
                        }
                        Ok(EngineReply::FinalAnswer(_)) => {
                            degradations.push("engine: empty final answer".to_string());
                            Self::fallback_state(&interim, forced_final, "engine returned an empty answer")
                        }
                        Ok(EngineReply::ToolCallBatch { preamble, calls }) if forced_final || calls.is_empty() => {
                            if let Some(text) = preamble.as_deref() {
                                Self::append_interim(&mut interim, text);
                            }
                            if forced_final {
                                warn!(requested = calls.len(), rounds, "Tool round cap reached, finalizing");
                            }
                            Self::fallback_state(&interim, forced_final, "engine returned neither tools nor an answer")
                        }
                        Ok(EngineReply::ToolCallBatch { preamble, calls }) => {
                            ConversationState::ToolRequested { preamble, calls }
                        }
                        Err(e) => {
                            warn!(error = %e, "Reasoning engine unavailable, aborting conversation");
                            degradations.push(format!("engine: {e}"));
                            ConversationState::Aborted {
                                termination: TerminationReason::Error { detail: e.to_string() },
                            }
                        }
                    }
                }

                ConversationState::ToolRequested { preamble, calls } => {
                    rounds += 1;
                    if let Some(text) = preamble.as_deref() {
                        Self::append_interim(&mut interim, text);
                    }
                    info!(round = rounds, calls = calls.len(), "Executing tool round");
                    for call in &calls {
                        sink.emit(StreamEvent::ToolStart {
                            call_id: call.call_id.clone(),
                            name: call.name.clone(),
                        })
                        .await;
                    }
                    turns.push(Turn::tool_invocation(preamble, calls.clone()));
                    ConversationState::ExecutingTools { calls }
                }

                ConversationState::ExecutingTools { calls } => {
                    let batch = join_all(calls.iter().map(|call| self.registry.execute(call)));
                    match timeout_at(deadline, batch).await {
                        Ok(batch_records) => {
                            // join_all preserves request order.
                            for record in batch_records {
                                sink.emit(StreamEvent::ToolEnd {
                                    call_id: record.call_id.clone(),
                                    name: record.name.clone(),
                                    ok: record.is_ok(),
                                    elapsed_ms: record.elapsed_ms,
                                })
                                .await;
                                if let Some(err) = &record.error {
                                    degradations.push(format!("tool {}: {err}", record.name));
                                }
                                turns.push(record.to_turn());
                                records.push(record);
                            }
                            ConversationState::AwaitingModel
                        }
                        Err(_) => {
                            warn!(round = rounds, "Deadline expired during tool execution");
                            degradations.push("deadline: expired during tool execution".to_string());
                            ConversationState::Aborted {
                                termination: TerminationReason::Error {
                                    detail: "deadline exceeded during tool execution".to_string(),
                                },
                            }
                        }
                    }
                }

                ConversationState::Finalized { answer, termination } => {
                    if sink.is_streaming() {
                        for chunk in chunk_text(&answer, self.config.stream_chunk_chars) {
                            sink.emit(StreamEvent::Content { text: chunk }).await;
                        }
                    }
                    return self.finish(answer, termination, false, records, turns.len(), rounds, degradations);
                }

                ConversationState::Aborted { termination } => {
                    let message = match &termination {
                        TerminationReason::Error { detail } => detail.clone(),
                        other => other.to_string(),
                    };
                    sink.emit(StreamEvent::Error { message }).await;
                    return self.finish(
                        CANNED_ANSWER.to_string(),
                        termination,
                        true,
                        records,
                        turns.len(),
                        rounds,
                        degradations,
                    );
                }
            };
        }
    }

    /// Finalize with interim text if there is any, otherwise abort.
    fn fallback_state(interim: &str, capped: bool, detail: &str) -> ConversationState {
        let termination = if capped {
            TerminationReason::MaxTurnsExceeded
        } else {
            TerminationReason::Error { detail: detail.to_string() }
        };
        if interim.trim().is_empty() {
            ConversationState::Aborted { termination }
        } else {
            ConversationState::Finalized { answer: interim.to_string(), termination }
        }
    }

    fn append_interim(interim: &mut String, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !interim.is_empty() {
            interim.push_str("\n\n");
        }
        interim.push_str(text);
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        answer: String,
        termination: TerminationReason,
        aborted: bool,
        tool_calls: Vec<ToolCallRecord>,
        turns: usize,
        rounds: u32,
        degradations: Vec<String>,
    ) -> ConversationOutcome {
        info!(
            rounds,
            tool_calls = tool_calls.len(),
            termination = %termination,
            aborted,
            "Conversation finished"
        );
        ConversationOutcome {
            answer,
            termination,
            tool_calls,
            turns,
            rounds,
            aborted,
            degradations,
        }
    }

    /// One engine turn with a single retry, bounded by the deadline.
    async fn call_engine(
        &self,
        engine: &dyn ReasoningEngine,
        turns: &[Turn],
        tools: &[ToolDefinition],
        deadline: Instant,
    ) -> Result<EngineReply, EngineError> {
        let backoff = Duration::from_millis(self.config.engine_retry_backoff_ms);
        let mut last_error = String::new();

        for attempt in 0..2 {
            if attempt > 0 {
                if Instant::now() + backoff >= deadline {
                    break;
                }
                tokio::time::sleep(backoff).await;
            }
            if Instant::now() >= deadline {
                return Err(EngineError::upstream(ENGINE_SERVICE, "deadline exceeded"));
            }
            match timeout_at(deadline, engine.converse(turns, tools)).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => {
                    last_error = format!("{e:#}");
                    warn!(attempt = attempt + 1, error = %last_error, "Reasoning engine call failed");
                }
                Err(_) => return Err(EngineError::upstream(ENGINE_SERVICE, "deadline exceeded")),
            }
        }
        Err(EngineError::upstream(ENGINE_SERVICE, last_error))
    }

    /// Stream the tool-less final turn. `None` means nothing was emitted and
    /// the caller should fall back to a buffered call.
    async fn stream_final(
        &self,
        engine: &dyn ReasoningEngine,
        turns: &[Turn],
        deadline: Instant,
        sink: Sink<'_>,
        degradations: &mut Vec<String>,
    ) -> Option<String> {
        let mut stream = match timeout_at(deadline, engine.converse_stream(turns, &[])).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let detail = format!("{e:#}");
                warn!(error = %detail, "Could not open answer stream");
                return None;
            }
            Err(_) => return None,
        };

        let mut answer = String::new();
        loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    answer.push_str(&chunk);
                    sink.emit(StreamEvent::Content { text: chunk }).await;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let detail = format!("{e:#}");
                    warn!(error = %detail, received = answer.len(), "Answer stream failed");
                    if answer.is_empty() {
                        return None;
                    }
                    degradations.push("stream: answer truncated by upstream error".to_string());
                    break;
                }
                Err(_) => {
                    if answer.is_empty() {
                        return None;
                    }
                    degradations.push("deadline: answer stream truncated".to_string());
                    break;
                }
            }
        }
        if answer.trim().is_empty() {
            None
        } else {
            Some(answer)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
