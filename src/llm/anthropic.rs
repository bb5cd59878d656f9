//! Anthropic Claude integration.
//!
//! Implements `ReasoningEngine` on the Anthropic Messages API with tool use.
//! Handles transcript conversion (system prompt, alternating roles, tool
//! results folded into user turns), reply parsing into `EngineReply`,
//! server-sent-event streaming of final answers and cost tracking.
//!
//! The client makes a single attempt per call; retry policy belongs to the
//! orchestrator and selector.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::{
    invocation_as_text, result_as_text, ChunkStream, EngineReply, ReasoningEngine, Role, ToolCallRequest,
    ToolDefinition, Turn, TurnContent,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Approximate cost per 1K input tokens (Sonnet).
const INPUT_COST_PER_1K: f64 = 0.003;
/// Approximate cost per 1K output tokens (Sonnet).
const OUTPUT_COST_PER_1K: f64 = 0.015;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// One `data:` payload of the streaming API.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, PartialEq)]
enum SseFrame {
    Text(String),
    Stop,
    Error(String),
    Skip,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnthropicClient {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    total_cost: AtomicU64, // stored as cost * 1_000_000
    total_calls: AtomicU64,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key: SecretString::new(api_key),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_cost: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Convert the transcript into the API's system string plus strictly
    /// alternating messages. Consecutive same-role turns are merged, which
    /// also groups parallel tool results into one user message.
    ///
    /// With `tools_offered` false, earlier tool turns are rendered as text:
    /// the API rejects `tool_use`/`tool_result` blocks without definitions.
    fn build_messages(turns: &[Turn], tools_offered: bool) -> (Option<String>, Vec<Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<Message> = Vec::new();

        for turn in turns {
            let (role, blocks) = match (&turn.role, &turn.content) {
                (Role::System, TurnContent::Text { text }) => {
                    system_parts.push(text);
                    continue;
                }
                (Role::Assistant, TurnContent::Text { text }) => {
                    ("assistant", vec![ContentBlock::Text { text: text.clone() }])
                }
                (_, TurnContent::Text { text }) => ("user", vec![ContentBlock::Text { text: text.clone() }]),
                (_, TurnContent::ToolInvocation { preamble, calls }) if !tools_offered => (
                    "assistant",
                    vec![ContentBlock::Text { text: invocation_as_text(preamble.as_deref(), calls) }],
                ),
                (_, TurnContent::ToolResult { name, content, is_error, .. }) if !tools_offered => (
                    "user",
                    vec![ContentBlock::Text { text: result_as_text(name, content, *is_error) }],
                ),
                (_, TurnContent::ToolInvocation { preamble, calls }) => {
                    let mut blocks = Vec::with_capacity(calls.len() + 1);
                    if let Some(p) = preamble.as_ref().filter(|p| !p.trim().is_empty()) {
                        blocks.push(ContentBlock::Text { text: p.clone() });
                    }
                    blocks.extend(calls.iter().map(|c| ContentBlock::ToolUse {
                        id: c.call_id.clone(),
                        name: c.name.clone(),
                        input: c.args.clone(),
                    }));
                    ("assistant", blocks)
                }
                (_, TurnContent::ToolResult { call_id, content, is_error, .. }) => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    }],
                ),
            };

            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => messages.push(Message { role, content: blocks }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, messages)
    }

    /// Turn response content blocks into a tagged reply.
    fn parse_reply(content: Vec<ContentBlock>) -> EngineReply {
        let mut text = String::new();
        let mut calls = Vec::new();

        for block in content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => calls.push(ToolCallRequest {
                    call_id: id,
                    name,
                    args: input,
                }),
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }

        if calls.is_empty() {
            EngineReply::FinalAnswer(text)
        } else {
            let preamble = Some(text).filter(|t| !t.trim().is_empty());
            EngineReply::ToolCallBatch { preamble, calls }
        }
    }

    /// Interpret one server-sent-event frame.
    fn parse_sse_frame(frame: &str) -> SseFrame {
        let data: String = frame
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim)
            .collect();
        if data.is_empty() {
            return SseFrame::Skip;
        }
        let Ok(payload) = serde_json::from_str::<StreamPayload>(&data) else {
            return SseFrame::Skip;
        };
        match payload.kind.as_str() {
            "content_block_delta" => match payload.delta {
                Some(StreamDelta { kind, text: Some(t) }) if kind == "text_delta" => SseFrame::Text(t),
                _ => SseFrame::Skip,
            },
            "message_stop" => SseFrame::Stop,
            "error" => SseFrame::Error(
                payload
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown stream error".to_string()),
            ),
            _ => SseFrame::Skip,
        }
    }

    fn record_usage(&self, usage: &Usage) -> f64 {
        let cost = (usage.input_tokens as f64 / 1000.0) * INPUT_COST_PER_1K
            + (usage.output_tokens as f64 / 1000.0) * OUTPUT_COST_PER_1K;
        self.total_cost.fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        cost
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {status}: {error_text}");
        }
        Ok(response)
    }

    fn request<'a>(&'a self, turns: &[Turn], tools: &'a [ToolDefinition], stream: bool) -> MessagesRequest<'a> {
        let (system, messages) = Self::build_messages(turns, !tools.is_empty());
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages,
            system,
            tools: tools
                .iter()
                .map(|t| ApiTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
            stream,
        }
    }

    /// Total cumulative cost across all calls.
    pub fn cumulative_cost(&self) -> f64 {
        self.total_cost.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Total number of API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ReasoningEngine implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ReasoningEngine for AnthropicClient {
    async fn converse(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<EngineReply> {
        let request = self.request(turns, tools, false);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Sending Anthropic turn"
        );

        let body: MessagesResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let cost = self.record_usage(&body.usage.unwrap_or_default());
        let reply = Self::parse_reply(body.content);

        info!(
            model = %self.model,
            stop_reason = body.stop_reason.as_deref().unwrap_or("none"),
            tool_calls = match &reply {
                EngineReply::ToolCallBatch { calls, .. } => calls.len(),
                EngineReply::FinalAnswer(_) => 0,
            },
            cost = format!("${:.4}", cost),
            "Anthropic turn complete"
        );

        Ok(reply)
    }

    async fn converse_stream(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<ChunkStream> {
        let request = self.request(turns, tools, true);
        let response = self.send(&request).await?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let bytes = response.bytes_stream().boxed();
        let chunks = stream::unfold((bytes, Vec::<u8>::new(), false), |(mut bytes, mut buf, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buf.windows(2).position(|w| w == b"\n\n") {
                    let frame = String::from_utf8_lossy(&buf[..pos]).into_owned();
                    buf.drain(..pos + 2);
                    match Self::parse_sse_frame(&frame) {
                        SseFrame::Text(t) => return Some((Ok(t), (bytes, buf, false))),
                        SseFrame::Stop => return None,
                        SseFrame::Error(e) => {
                            return Some((Err(anyhow!("Anthropic stream error: {e}")), (bytes, buf, true)))
                        }
                        SseFrame::Skip => continue,
                    }
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(anyhow!(e).context("Anthropic stream read failed")), (bytes, buf, true)))
                    }
                    None => return None,
                }
            }
        });

        Ok(chunks.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
