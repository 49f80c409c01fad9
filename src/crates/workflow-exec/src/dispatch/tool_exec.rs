//! `tool`, `map`, and `subflow` executors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::{EngineError, Result};
use workflow_core::expr::EvalContext;

use crate::cancel::CancelToken;
use crate::credentials::Secret;
use crate::llm::ToolAdapter;

use super::{Executor, StepResult, SubflowRunner};

/// `tool`: dispatches into a named [`ToolAdapter`].
pub struct ToolExecutor {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl ToolExecutor {
    #[must_use]
    pub fn new(adapters: HashMap<String, Arc<dyn ToolAdapter>>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl Executor for ToolExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let adapter_name = step
            .config
            .get("adapter")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("tool step missing `config.adapter`"))?;
        let adapter = self.adapters.get(adapter_name).ok_or_else(|| {
            EngineError::permanent(format!("no tool adapter registered for `{adapter_name}`"))
        })?;
        let output = adapter.invoke(&step.config, resolved_input).await?;
        Ok(StepResult::new(output))
    }
}

/// `map`: fans a `resolved_input` array out to one invocation of the
/// configured `adapter` per element, collecting results positionally.
/// Elements are dispatched sequentially, matching this crate's
/// convention of deterministic, in-order fan-out (see the `agent` tool-call
/// loop in `llm_exec.rs`).
pub struct MapExecutor {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl MapExecutor {
    #[must_use]
    pub fn new(adapters: HashMap<String, Arc<dyn ToolAdapter>>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl Executor for MapExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let adapter_name = step
            .config
            .get("adapter")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("map step missing `config.adapter`"))?;
        let adapter = self.adapters.get(adapter_name).ok_or_else(|| {
            EngineError::permanent(format!("no tool adapter registered for `{adapter_name}`"))
        })?;
        let items = resolved_input
            .as_array()
            .cloned()
            .ok_or_else(|| EngineError::permanent("map step input must be a JSON array"))?;

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            if cancel.is_cancelled() {
                return Err(EngineError::new(
                    workflow_core::error::ErrorKind::Cancelled,
                    "map step cancelled",
                ));
            }
            let mapped = adapter.invoke(&step.config, item).await?;
            outputs.push(mapped);
        }
        Ok(StepResult::new(serde_json::Value::Array(outputs)))
    }
}

/// `subflow`: runs another project version as a child run to completion,
/// returning its output. The actual run is owned by
/// the scheduler through the injected [`SubflowRunner`].
pub struct SubflowExecutor {
    runner: Arc<dyn SubflowRunner>,
}

impl SubflowExecutor {
    #[must_use]
    pub fn new(runner: Arc<dyn SubflowRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Executor for SubflowExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let project_id = step
            .config
            .get("project_id")
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::permanent("subflow step missing `config.project_id`"))?;
        let tenant_id = ctx
            .run
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::permanent("subflow step: run context missing tenant_id"))?;
        let output = self.runner.run_subflow(tenant_id, project_id, resolved_input).await?;
        Ok(StepResult::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::model::RetryConfig;

    fn map_step() -> CompiledStep {
        CompiledStep {
            id: uuid::Uuid::new_v4(),
            name: "double-all".into(),
            step_type: workflow_core::model::StepType::Map,
            config: serde_json::json!({ "adapter": "double" }),
            credential_bindings: HashMap::new(),
            retry_config: RetryConfig::default(),
            timeout_ms: 60_000,
            group_chain: Vec::new(),
        }
    }

    struct DoubleAdapter;

    #[async_trait]
    impl ToolAdapter for DoubleAdapter {
        async fn invoke(&self, _config: &serde_json::Value, input: serde_json::Value) -> Result<serde_json::Value> {
            let v = input.as_i64().unwrap_or(0);
            Ok(serde_json::json!(v * 2))
        }
    }

    #[tokio::test]
    async fn map_executor_applies_adapter_to_each_element() {
        let mut adapters: HashMap<String, Arc<dyn ToolAdapter>> = HashMap::new();
        adapters.insert("double".into(), Arc::new(DoubleAdapter));
        let executor = MapExecutor::new(adapters);
        let ctx = EvalContext::new(serde_json::Value::Null);
        let result = executor
            .execute(
                &map_step(),
                serde_json::json!([1, 2, 3]),
                &ctx,
                &HashMap::new(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.output, serde_json::json!([2, 4, 6]));
    }
}
