//! Reasoning-engine integration.
//!
//! Defines the `ReasoningEngine` trait, the conversation turn model it
//! consumes and the tagged `EngineReply` it produces. Implementations are
//! provided for Claude (Anthropic Messages API), OpenRouter and an offline
//! engine used when no API key is configured.
//!
//! Clients are stateless handles passed into the orchestrator and selector
//! per call, so tests can substitute scripted doubles freely.

pub mod anthropic;
pub mod offline;
pub mod openrouter;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Conversation model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolInvocation {
        #[serde(default)]
        preamble: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

/// One entry in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: TurnContent::Text { text: text.into() } }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: TurnContent::Text { text: text.into() } }
    }

    pub fn tool_invocation(preamble: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::ToolInvocation { preamble, calls },
        }
    }

    pub fn tool_result(call_id: &str, name: &str, content: String, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: TurnContent::ToolResult {
                call_id: call_id.to_string(),
                name: name.to_string(),
                content,
                is_error,
            },
        }
    }

    /// Plain text carried by this turn, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            TurnContent::ToolInvocation { preamble, .. } => preamble.as_deref(),
            TurnContent::ToolResult { .. } => None,
        }
    }
}

/// Plain-text rendering of a tool invocation, for turns that offer no
/// tools. Providers reject tool blocks in a request without definitions.
pub(crate) fn invocation_as_text(preamble: Option<&str>, calls: &[ToolCallRequest]) -> String {
    let mut lines: Vec<String> = preamble
        .filter(|p| !p.trim().is_empty())
        .map(|p| vec![p.to_string()])
        .unwrap_or_default();
    lines.extend(calls.iter().map(|c| format!("[called {} with {}]", c.name, c.args)));
    lines.join("\n")
}

/// Plain-text rendering of a tool result; see [`invocation_as_text`].
pub(crate) fn result_as_text(name: &str, content: &str, is_error: bool) -> String {
    if is_error {
        format!("[{name} failed]: {content}")
    } else {
        format!("[{name} returned]: {content}")
    }
}

/// Tool advertised to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: serde_json::Value,
}

/// What the engine answered with on one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    FinalAnswer(String),
    ToolCallBatch {
        /// Any text the engine produced alongside its tool requests.
        preamble: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

/// Ordered stream of content chunks for a final turn.
pub type ChunkStream = BoxStream<'static, Result<String>>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over reasoning engines with a fixed call contract.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Run one turn. Must tolerate an empty `tools` slice.
    async fn converse(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<EngineReply>;

    /// Run one turn and yield the final answer incrementally.
    ///
    /// The default buffers a `converse` reply and re-chunks it; engines with
    /// native streaming override this.
    async fn converse_stream(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<ChunkStream> {
        match self.converse(turns, tools).await? {
            EngineReply::FinalAnswer(text) => {
                let chunks = chunk_text(&text, DEFAULT_STREAM_CHUNK_CHARS);
                Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            EngineReply::ToolCallBatch { calls, .. } => anyhow::bail!(
                "Engine requested {} tool call(s) on a streamed turn",
                calls.len()
            ),
        }
    }

    /// Model identifier string, stamped on every recommendation.
    fn model_name(&self) -> &str;
}

pub const DEFAULT_STREAM_CHUNK_CHARS: usize = 48;

/// Split text into ordered chunks of roughly `max_chars` characters,
/// breaking after whitespace where possible. Concatenating the chunks
/// always reproduces the input exactly.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for c in text.chars() {
        current.push(c);
        count += 1;
        if (count >= max_chars && c.is_whitespace()) || count >= max_chars * 2 {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
