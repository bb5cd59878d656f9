//! Offline reasoning engine.
//!
//! Used when no LLM API key is configured. Every call reports the engine as
//! unavailable, which sends the selector down its deterministic ranking
//! path and the orchestrator to its canned safe answer.

use anyhow::Result;
use async_trait::async_trait;

use super::{EngineReply, ReasoningEngine, ToolDefinition, Turn};

pub const OFFLINE_MODEL: &str = "offline";

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineEngine;

#[async_trait]
impl ReasoningEngine for OfflineEngine {
    async fn converse(&self, _turns: &[Turn], _tools: &[ToolDefinition]) -> Result<EngineReply> {
        anyhow::bail!("No reasoning engine configured (offline mode)")
    }

    fn model_name(&self) -> &str {
        OFFLINE_MODEL
    }
}
