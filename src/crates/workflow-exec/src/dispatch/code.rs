//! `code` and `function` executors: both dispatch into the code
//! sandbox contract; `function` is the simpler variant with no
//! `ctx.http`/`ctx.db` capability, a synchronous code block with no
//! network or store access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::Result;
use workflow_core::expr::EvalContext;

use crate::cancel::CancelToken;
use crate::credentials::Secret;
use crate::sandbox::{Sandbox, SandboxCapabilities};

use super::{Executor, StepResult};

/// `code`: arbitrary JavaScript with the full capability set the step's
/// config declares.
pub struct CodeExecutor {
    sandbox: Arc<dyn Sandbox>,
}

impl CodeExecutor {
    #[must_use]
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Executor for CodeExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let code = step
            .config
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| workflow_core::error::EngineError::permanent("code step missing `config.code`"))?;
        let timeout_ms = step
            .config
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(step.timeout_ms);
        let capabilities = SandboxCapabilities {
            allow_http: step.config.get("allow_http").and_then(|v| v.as_bool()).unwrap_or(false),
            secrets: credentials
                .iter()
                .map(|(k, v)| (k.clone(), v.expose().to_string()))
                .collect(),
            allow_db: step.config.get("allow_db").and_then(|v| v.as_bool()).unwrap_or(false),
        };
        let outcome = self
            .sandbox
            .execute(code, resolved_input, &capabilities, timeout_ms)
            .await?;
        Ok(StepResult::new(outcome.output))
    }
}

/// `function`: a synchronous code block with no ambient `http`/`db`
/// capability.
pub struct FunctionExecutor {
    sandbox: Arc<dyn Sandbox>,
}

impl FunctionExecutor {
    #[must_use]
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let code = step
            .config
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| workflow_core::error::EngineError::permanent("function step missing `config.code`"))?;
        let outcome = self
            .sandbox
            .execute(code, resolved_input, &SandboxCapabilities::default(), step.timeout_ms)
            .await?;
        Ok(StepResult::new(outcome.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;
    use workflow_core::model::RetryConfig;

    struct DoublingSandbox;

    #[async_trait]
    impl Sandbox for DoublingSandbox {
        async fn execute(
            &self,
            _code: &str,
            input: serde_json::Value,
            _capabilities: &SandboxCapabilities,
            _timeout_ms: u64,
        ) -> Result<crate::sandbox::SandboxOutput> {
            let v = input.get("v").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(crate::sandbox::SandboxOutput {
                output: serde_json::json!({ "x": v * 2 }),
                logs: Vec::new(),
            })
        }
    }

    fn function_step() -> CompiledStep {
        CompiledStep {
            id: Uuid::new_v4(),
            name: "double".into(),
            step_type: workflow_core::model::StepType::Function,
            config: serde_json::json!({ "code": "return {x: input.v * 2}" }),
            credential_bindings: HashMap::new(),
            retry_config: RetryConfig::default(),
            timeout_ms: 60_000,
            group_chain: Vec::new(),
        }
    }

    #[tokio::test]
    async fn function_executor_runs_through_sandbox() {
        let executor = FunctionExecutor::new(Arc::new(DoublingSandbox));
        let ctx = EvalContext::new(serde_json::Value::Null);
        let result = executor
            .execute(
                &function_step(),
                serde_json::json!({ "v": 5 }),
                &ctx,
                &HashMap::new(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.output, serde_json::json!({ "x": 10 }));
    }
}
