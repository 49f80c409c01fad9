//! `llm`, `agent`, and `router` executors: the LLM-backed step
//! types. `agent` drives a ReAct loop,
//! executing sibling steps as tools and persisting conversation turns to
//! agent memory via the same `RunStore` the scheduler already depends on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::{EngineError, ErrorKind, Result};
use workflow_core::expr::{render_template, EvalCapabilities, EvalContext};
use workflow_core::model::{AgentMessage, MessageRole};
use workflow_checkpoint::RunStore;

use crate::cancel::CancelToken;
use crate::credentials::Secret;
use crate::llm::{LlmProvider, LlmRequest, ToolSchema};

use super::{Executor, StepResult};

fn run_and_tenant(ctx: &EvalContext) -> (Uuid, Uuid) {
    let run_id = ctx
        .run
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_default();
    let tenant_id = ctx
        .run
        .get("tenant_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_default();
    (run_id, tenant_id)
}

/// `llm`: a single prompt/completion call.
pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Executor for LlmExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let (run_id, tenant_id) = run_and_tenant(ctx);
        let provider_name = step
            .config
            .get("provider")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("llm step missing `config.provider`"))?
            .to_string();
        let model = step
            .config
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("llm step missing `config.model`"))?
            .to_string();
        let prompt_template = step
            .config
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("llm step missing `config.prompt`"))?;

        let mut secret_ctx = ctx.clone();
        secret_ctx.secrets = credentials
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.expose().to_string())))
            .collect();
        secret_ctx.capabilities = EvalCapabilities::with_secrets();
        let prompt = render_template(prompt_template, &secret_ctx)
            .map_err(|e| EngineError::permanent(format!("prompt template error: {e}")))?;

        let request = LlmRequest {
            provider: provider_name.clone(),
            model: model.clone(),
            prompt,
            temperature: step.config.get("temperature").and_then(|v| v.as_f64()),
            max_tokens: step.config.get("max_tokens").and_then(|v| v.as_u64()),
            tools: Vec::new(),
        };
        let completion = self.provider.complete(request).await?;
        let mut result = StepResult::new(completion.content);
        result.usage = Some(completion.usage.into_record(
            tenant_id,
            run_id,
            Uuid::nil(),
            provider_name,
            model,
            "llm",
            true,
        ));
        Ok(result)
    }
}

/// `router`: LLM-based classification into one of `config.routes`.
pub struct RouterExecutor {
    provider: Arc<dyn LlmProvider>,
}

impl RouterExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Executor for RouterExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let (run_id, tenant_id) = run_and_tenant(ctx);
        let provider_name = step
            .config
            .get("provider")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("router step missing `config.provider`"))?
            .to_string();
        let model = step
            .config
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("router step missing `config.model`"))?
            .to_string();
        let routes: Vec<String> = step
            .config
            .get("routes")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .ok_or_else(|| EngineError::permanent("router step missing `config.routes`"))?;
        let prompt_template = step
            .config
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("Classify this input.");
        let rendered = render_template(prompt_template, ctx)
            .map_err(|e| EngineError::permanent(format!("prompt template error: {e}")))?;
        let prompt = format!(
            "{rendered}\n\nRespond with exactly one of the following route names: {}",
            routes.join(", ")
        );

        let request = LlmRequest {
            provider: provider_name.clone(),
            model: model.clone(),
            prompt,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        };
        let completion = self.provider.complete(request).await?;
        let chosen = completion
            .content
            .as_str()
            .map(str::trim)
            .filter(|candidate| routes.iter().any(|r| r == candidate))
            .map(str::to_string)
            .or_else(|| routes.first().cloned())
            .ok_or_else(|| EngineError::permanent("router step has no configured routes"))?;

        let mut result = StepResult::new(serde_json::json!({ "branch": chosen }));
        result.usage = Some(completion.usage.into_record(
            tenant_id,
            run_id,
            Uuid::nil(),
            provider_name,
            model,
            "router",
            true,
        ));
        Ok(result)
    }
}

/// Invokes a sibling step as a tool call target for an `agent` step's
/// ReAct loop.
/// Implemented by the scheduler, which alone can resolve a step by name
/// within the same plan and run it through the full state machine.
#[async_trait]
pub trait SiblingStepRunner: Send + Sync {
    async fn run_sibling_step(
        &self,
        step_name: &str,
        arguments: serde_json::Value,
        ctx: &EvalContext,
    ) -> Result<serde_json::Value>;
}

const DEFAULT_MAX_AGENT_ITERATIONS: u32 = 25;

/// `agent`: a ReAct loop over registered tool steps.
/// Tool calls from one assistant turn are dispatched sequentially, in the
/// order the model emitted them.
pub struct AgentExecutor {
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn RunStore>,
    sibling_runner: Arc<dyn SiblingStepRunner>,
}

impl AgentExecutor {
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        memory: Arc<dyn RunStore>,
        sibling_runner: Arc<dyn SiblingStepRunner>,
    ) -> Self {
        Self {
            provider,
            memory,
            sibling_runner,
        }
    }

    async fn append_memory(&self, message: AgentMessage) -> Result<()> {
        self.memory
            .append_agent_message(message)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to persist agent memory: {e}")))
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let (run_id, tenant_id) = run_and_tenant(ctx);
        let provider_name = step
            .config
            .get("provider")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("agent step missing `config.provider`"))?
            .to_string();
        let model = step
            .config
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("agent step missing `config.model`"))?
            .to_string();
        let prompt_template = step
            .config
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("{{$input}}");
        let max_iterations = step
            .config
            .get("max_iterations")
            .and_then(|v| v.as_u64())
            .map_or(DEFAULT_MAX_AGENT_ITERATIONS, |v| v as u32);
        let tools: Vec<ToolSchema> = step
            .config
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut memory = self.memory.read_agent_memory(tenant_id, run_id, step.id).await.map_err(|e| {
            EngineError::permanent(format!("failed to load agent memory: {e}"))
        })?;
        let mut next_seq = memory.last().map_or(0, |m| m.sequence_number + 1);

        if memory.is_empty() {
            let rendered_prompt = render_template(prompt_template, ctx)
                .map_err(|e| EngineError::permanent(format!("prompt template error: {e}")))?;
            let seed = AgentMessage {
                run_id,
                step_id: step.id,
                sequence_number: next_seq,
                role: MessageRole::User,
                content: serde_json::Value::String(rendered_prompt),
                tool_calls: Vec::new(),
                tool_call_id: None,
            };
            self.append_memory(seed.clone()).await?;
            memory.push(seed);
            next_seq += 1;
        }

        let mut total_usage = crate::llm::LlmUsage::default();
        for _ in 0..max_iterations {
            if cancel.is_cancelled() {
                return Err(EngineError::new(ErrorKind::Cancelled, "agent step cancelled"));
            }

            let transcript = render_transcript(&memory);
            let request = LlmRequest {
                provider: provider_name.clone(),
                model: model.clone(),
                prompt: transcript,
                temperature: step.config.get("temperature").and_then(|v| v.as_f64()),
                max_tokens: step.config.get("max_tokens").and_then(|v| v.as_u64()),
                tools: tools.clone(),
            };
            let completion = self.provider.complete(request).await?;
            total_usage.input_tokens += completion.usage.input_tokens;
            total_usage.output_tokens += completion.usage.output_tokens;
            total_usage.latency_ms += completion.usage.latency_ms;

            if completion.tool_calls.is_empty() {
                let assistant_msg = AgentMessage {
                    run_id,
                    step_id: step.id,
                    sequence_number: next_seq,
                    role: MessageRole::Assistant,
                    content: completion.content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                };
                self.append_memory(assistant_msg).await?;

                let mut result = StepResult::new(completion.content);
                result.usage = Some(total_usage.into_record(
                    tenant_id,
                    run_id,
                    Uuid::nil(),
                    provider_name,
                    model,
                    "agent",
                    true,
                ));
                return Ok(result);
            }

            let serialized_calls: Vec<serde_json::Value> = completion
                .tool_calls
                .iter()
                .map(|tc| serde_json::json!({"id": tc.id, "name": tc.name, "arguments": tc.arguments}))
                .collect();
            let assistant_msg = AgentMessage {
                run_id,
                step_id: step.id,
                sequence_number: next_seq,
                role: MessageRole::Assistant,
                content: completion.content.clone(),
                tool_calls: serialized_calls,
                tool_call_id: None,
            };
            self.append_memory(assistant_msg.clone()).await?;
            memory.push(assistant_msg);
            next_seq += 1;

            for tool_call in &completion.tool_calls {
                let tool_output = self
                    .sibling_runner
                    .run_sibling_step(&tool_call.name, tool_call.arguments.clone(), ctx)
                    .await?;
                let tool_msg = AgentMessage {
                    run_id,
                    step_id: step.id,
                    sequence_number: next_seq,
                    role: MessageRole::Tool,
                    content: tool_output,
                    tool_calls: Vec::new(),
                    tool_call_id: Some(tool_call.id.clone()),
                };
                self.append_memory(tool_msg.clone()).await?;
                memory.push(tool_msg);
                next_seq += 1;
            }
        }

        let _ = resolved_input;
        Err(EngineError::permanent(format!(
            "agent step exceeded max_iterations ({max_iterations}) without a natural stop"
        )))
    }
}

fn render_transcript(memory: &[AgentMessage]) -> String {
    memory
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
