//! OpenRouter integration.
//!
//! Routes reasoning-engine turns through OpenRouter's unified API, giving
//! access to multiple model providers with a single API key. Uses the
//! OpenAI-compatible chat completions format, including function-style
//! tool calls.
//!
//! Primary model: Claude 4 Sonnet (best probabilistic reasoning & calibration).
//! Fallback model: Grok-4.1-fast (cheap & fast, used when primary fails).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::{
    invocation_as_text, result_as_text, EngineReply, ReasoningEngine, Role, ToolCallRequest, ToolDefinition,
    Turn, TurnContent,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default primary model: Claude 4 Sonnet via OpenRouter.
const DEFAULT_PRIMARY_MODEL: &str = "anthropic/claude-sonnet-4";

/// Default fallback model: Grok-4.1-fast via OpenRouter (cheap/fast).
const DEFAULT_FALLBACK_MODEL: &str = "x-ai/grok-4.1-fast";

const DEFAULT_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// Cost tables (approximate per-1K-token pricing via OpenRouter)
// ---------------------------------------------------------------------------

/// Returns (input_cost_per_1k, output_cost_per_1k) for known models.
fn model_costs(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("claude") && m.contains("sonnet") => (0.003, 0.015),
        m if m.contains("claude") && m.contains("opus") => (0.015, 0.075),
        m if m.contains("claude") && m.contains("haiku") => (0.0008, 0.004),
        m if m.contains("grok") => (0.003, 0.015),
        m if m.contains("gpt-4o") => (0.005, 0.015),
        // Conservative default
        _ => (0.005, 0.015),
    }
}

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ApiFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct ApiFunctionCall {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_cost: AtomicU64, // stored as cost * 1_000_000
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client.
    ///
    /// - `api_key`: OpenRouter API key.
    /// - `primary_model`: Primary model ID (e.g. "anthropic/claude-sonnet-4").
    /// - `fallback_model`: Optional fallback model for when primary fails.
    /// - `max_tokens`: Max output tokens per request.
    pub fn new(
        api_key: String,
        primary_model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key: SecretString::new(api_key),
            primary_model: primary_model.unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model: Some(
                fallback_model.unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string()),
            ),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_cost: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Convert the transcript into chat-completions messages. With
    /// `tools_offered` false, earlier tool turns are rendered as text, since
    /// `tool` messages are only valid alongside function definitions.
    fn build_messages(turns: &[Turn], tools_offered: bool) -> Vec<ChatMessage> {
        turns
            .iter()
            .map(|turn| match (&turn.role, &turn.content) {
                (role, TurnContent::Text { text }) => {
                    let role = match role {
                        Role::System => "system",
                        Role::Assistant => "assistant",
                        Role::User | Role::Tool => "user",
                    };
                    ChatMessage::text(role, text)
                }
                (_, TurnContent::ToolInvocation { preamble, calls }) if !tools_offered => {
                    ChatMessage::text("assistant", &invocation_as_text(preamble.as_deref(), calls))
                }
                (_, TurnContent::ToolResult { name, content, is_error, .. }) if !tools_offered => {
                    ChatMessage::text("user", &result_as_text(name, content, *is_error))
                }
                (_, TurnContent::ToolInvocation { preamble, calls }) => ChatMessage {
                    role: "assistant".to_string(),
                    content: preamble.clone(),
                    tool_calls: calls
                        .iter()
                        .map(|c| ApiToolCall {
                            id: c.call_id.clone(),
                            kind: function_kind(),
                            function: ApiFunctionCall {
                                name: c.name.clone(),
                                arguments: c.args.to_string(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                },
                (_, TurnContent::ToolResult { call_id, content, .. }) => ChatMessage {
                    role: "tool".to_string(),
                    content: Some(content.clone()),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call_id.clone()),
                },
            })
            .collect()
    }

    /// Turn the first choice into a tagged reply. Unparseable argument
    /// strings are passed through as JSON strings so the dispatcher can
    /// reject them as invalid arguments.
    fn parse_reply(message: Option<ChatMessage>) -> EngineReply {
        let Some(message) = message else {
            return EngineReply::FinalAnswer(String::new());
        };
        let text = message.content.unwrap_or_default();
        if message.tool_calls.is_empty() {
            return EngineReply::FinalAnswer(text);
        }
        let calls = message
            .tool_calls
            .into_iter()
            .map(|c| ToolCallRequest {
                call_id: c.id,
                args: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::String(c.function.arguments)),
                name: c.function.name,
            })
            .collect();
        EngineReply::ToolCallBatch {
            preamble: Some(text).filter(|t| !t.trim().is_empty()),
            calls,
        }
    }

    /// Send one chat completion request to a specific model.
    async fn call_model(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<EngineReply> {
        let request = ChatRequest {
            model,
            max_tokens: self.max_tokens,
            messages,
            tools: tools
                .iter()
                .map(|t| ApiTool {
                    kind: "function",
                    function: ApiFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.input_schema,
                    },
                })
                .collect(),
        };

        let response = self
            .http
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .header("X-Title", "HANDICAPPER Recommendation Engine")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("OpenRouter request failed (model={model})"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error {status} (model={model}): {error_text}");
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        let usage = body.usage.unwrap_or_default();
        // Use the actual model returned (may differ from requested)
        let actual_model = body.model.as_deref().unwrap_or(model);
        let (input_cost, output_cost) = model_costs(actual_model);
        let cost = (usage.prompt_tokens as f64 / 1000.0) * input_cost
            + (usage.completion_tokens as f64 / 1000.0) * output_cost;
        self.total_cost.fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        debug!(model = actual_model, cost = format!("${:.4}", cost), "OpenRouter turn complete");

        Ok(Self::parse_reply(body.choices.into_iter().next().and_then(|c| c.message)))
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
impl ReasoningEngine for OpenRouterClient {
    /// Call the primary model, falling back to the secondary if configured
    /// and the primary fails.
    async fn converse(&self, turns: &[Turn], tools: &[ToolDefinition]) -> Result<EngineReply> {
        let messages = Self::build_messages(turns, !tools.is_empty());
        match self.call_model(&self.primary_model, &messages, tools).await {
            Ok(reply) => Ok(reply),
            Err(primary_err) => {
                let Some(fallback) = self.fallback_model.as_deref() else {
                    return Err(primary_err);
                };
                warn!(
                    primary = %self.primary_model,
                    fallback,
                    error = %primary_err,
                    "Primary model failed, falling back"
                );
                let reply = self
                    .call_model(fallback, &messages, tools)
                    .await
                    .with_context(|| {
                        format!(
                            "Both primary ({}) and fallback ({}) models failed. Primary error: {}",
                            self.primary_model, fallback, primary_err
                        )
                    })?;
                info!(model = fallback, "Fallback model answered");
                Ok(reply)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.primary_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
