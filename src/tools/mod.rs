//! Tool registry and dispatcher.
//!
//! Maps named tool invocations from the reasoning engine to typed
//! handlers. Arguments are checked against each tool's parameter schema
//! and deserialized into the tool's own argument type before the handler
//! runs. Every handler call is bounded by a timeout; read-only tools get
//! at most one retry with backoff, side-effecting tools never retry.
//!
//! Dispatch never panics or throws across the orchestrator boundary:
//! failures come back as `ToolError` values and are handed to the engine
//! as error-bearing tool results.

pub mod builtin;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::data::{InjuryReport, NewsDigest};
use crate::llm::{ToolCallRequest, ToolDefinition, Turn};
use crate::strategy::edge::EdgeEvaluation;
use crate::types::{Candidate, Event, MarketQuote};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool {tool} failed: {message}")]
    HandlerFailure { tool: String, message: String },

    #[error("Tool {tool} timed out after {after_ms}ms")]
    Timeout { tool: String, after_ms: u64 },

    #[error("Tool {0} is already registered")]
    DuplicateTool(String),
}

impl ToolError {
    /// Only transient failures are worth a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::HandlerFailure { .. } | ToolError::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    /// String restricted to a fixed set of values.
    Enum(&'static [&'static str]),
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Enum(allowed) => value.as_str().is_some_and(|s| allowed.contains(&s)),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamKind::String => json!({"type": "string"}),
            ParamKind::Number => json!({"type": "number"}),
            ParamKind::Integer => json!({"type": "integer"}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::Enum(allowed) => json!({"type": "string", "enum": allowed}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
}

/// Flat object schema for tool arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        self.params.push(Parameter { name, kind, description, required: true });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        self.params.push(Parameter { name, kind, description, required: false });
        self
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// JSON Schema advertised to the reasoning engine.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                let mut schema = p.kind.json_schema();
                schema["description"] = Value::String(p.description.to_string());
                (p.name.to_string(), schema)
            })
            .collect();
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check an argument object against the schema.
    ///
    /// Unknown keys and wrongly-typed values are rejected; a `null` optional
    /// value counts as absent.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let obj = args
            .as_object()
            .ok_or_else(|| format!("arguments must be a JSON object, got {args}"))?;

        for key in obj.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(format!("unexpected argument '{key}'"));
            }
        }
        for p in &self.params {
            match obj.get(p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(format!("missing required argument '{}'", p.name));
                }
                None | Some(Value::Null) => {}
                Some(v) if !p.kind.matches(v) => {
                    return Err(format!("argument '{}' has the wrong type or value: {v}", p.name));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tool outputs
// ---------------------------------------------------------------------------

/// Discriminated result type, one variant per tool family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolOutput {
    News(NewsDigest),
    Injuries(InjuryReport),
    Events(Vec<Event>),
    Quote(Option<MarketQuote>),
    Edge(EdgeEvaluation),
    Candidates(Vec<Candidate>),
}

impl ToolOutput {
    /// Candidates carried by this output, if any.
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            ToolOutput::Candidates(c) => c,
            _ => &[],
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({"error": e.to_string()}))
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    ReadOnly,
    SideEffecting,
}

/// A typed tool handler.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> ParameterSchema;

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    async fn run(&self, args: Self::Args) -> anyhow::Result<ToolOutput>;
}

#[async_trait]
trait ErasedTool: Send + Sync {
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

struct Typed<T>(T);

#[async_trait]
impl<T: Tool> ErasedTool for Typed<T> {
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let tool = self.0.name();
        let args: T::Args = serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;
        self.0.run(args).await.map_err(|e| ToolError::HandlerFailure {
            tool: tool.to_string(),
            message: format!("{e:#}"),
        })
    }
}

struct Registered {
    definition: ToolDefinition,
    schema: ParameterSchema,
    effect: ToolEffect,
    handler: Arc<dyn ErasedTool>,
}

// ---------------------------------------------------------------------------
// Call records
// ---------------------------------------------------------------------------

/// One executed tool call. Ephemeral, scoped to a single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    /// Payload handed back to the engine (output or error object).
    pub result: Value,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    #[serde(skip)]
    pub output: Option<ToolOutput>,
}

impl ToolCallRecord {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Tool-result turn fed back to the engine.
    pub fn to_turn(&self) -> Turn {
        Turn::tool_result(&self.call_id, &self.name, self.result.to_string(), !self.is_ok())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    order: Vec<String>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl ToolRegistry {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout: Duration::from_millis(config.timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Register a tool under its own name. Names are unique.
    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        let schema = tool.schema();
        let entry = Registered {
            definition: ToolDefinition {
                name: name.clone(),
                description: tool.description().to_string(),
                input_schema: schema.to_json_schema(),
            },
            schema,
            effect: tool.effect(),
            handler: Arc::new(Typed(tool)),
        };
        self.tools.insert(name.clone(), entry);
        self.order.push(name);
        Ok(())
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Validate, run with timeout, and retry once if the tool is read-only.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = if args.is_null() { json!({}) } else { args };
        entry
            .schema
            .validate(&args)
            .map_err(|message| ToolError::InvalidArguments { tool: name.to_string(), message })?;

        match self.attempt(name, entry, args.clone()).await {
            Err(e) if e.is_retryable() && entry.effect == ToolEffect::ReadOnly => {
                warn!(tool = name, error = %e, "Tool call failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.attempt(name, entry, args).await
            }
            result => result,
        }
    }

    async fn attempt(&self, name: &str, entry: &Registered, args: Value) -> Result<ToolOutput, ToolError> {
        match tokio::time::timeout(self.timeout, entry.handler.call(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Dispatch one engine-requested call and capture it as a record.
    pub async fn execute(&self, call: &ToolCallRequest) -> ToolCallRecord {
        let started = Instant::now();
        let result = self.dispatch(&call.name, call.args.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.call_id, elapsed_ms, "Tool call ok");
                ToolCallRecord {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: output.to_json(),
                    elapsed_ms,
                    error: None,
                    output: Some(output),
                }
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.call_id, error = %e, "Tool call failed");
                ToolCallRecord {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: json!({"error": e.to_string()}),
                    elapsed_ms,
                    error: Some(e.to_string()),
                    output: None,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
