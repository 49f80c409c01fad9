//! The LLM provider and tool-adapter contracts `llm`, `agent`, `router`, and
//! `tool` steps dispatch into. Provider clients themselves are
//! out of scope ( "LLM provider clients, external HTTP
//! integrations"); the engine only needs the trait boundary, the same role
//! `langgraph_prebuilt`'s model-binding trait plays against concrete chat
//! model crates in the reference codebase.

use async_trait::async_trait;
use serde_json::Value;
use workflow_core::error::Result;
use workflow_core::model::UsageRecord;

/// A tool schema advertised to the model for function-calling.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A model-proposed tool invocation, part of an `agent` step's ReAct loop.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub tools: Vec<ToolSchema>,
}

/// A single model turn: either a final answer or a set of proposed tool
/// calls (never both populated meaningfully — `tool_calls` empty means the
/// loop has reached a natural stop, `agent`).
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub content: Value,
    pub tool_calls: Vec<ToolCall>,
    pub usage: LlmUsage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

impl LlmUsage {
    #[must_use]
    pub fn into_record(
        self,
        tenant_id: uuid::Uuid,
        run_id: uuid::Uuid,
        step_run_id: uuid::Uuid,
        provider: String,
        model: String,
        operation: &str,
        success: bool,
    ) -> UsageRecord {
        UsageRecord {
            tenant_id,
            run_id,
            step_run_id,
            provider,
            model,
            operation: operation.to_string(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            latency_ms: self.latency_ms,
            success,
        }
    }
}

/// The provider boundary `llm`/`agent`/`router` steps invoke through.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmCompletion>;
}

/// The adapter boundary a `tool` step invokes through.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(&self, config: &Value, input: Value) -> Result<Value>;
}

/// A deterministic [`ToolAdapter`] that echoes its input, used by tests and
/// by `TestStepInline` when no real adapter is configured.
pub struct MockToolAdapter;

#[async_trait]
impl ToolAdapter for MockToolAdapter {
    async fn invoke(&self, _config: &Value, input: Value) -> Result<Value> {
        Ok(input)
    }
}
