//! Built-in control-flow executors: `start`, `condition`, `switch`, `join`,
//! `set-variables`, `wait`, `human_in_loop`. None of these call
//! out to an external collaborator; they are pure functions of the
//! execution context (plus, for `wait`/`human_in_loop`, the clock and the
//! approval gate).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::{EngineError, ErrorKind, Result};
use workflow_core::expr::{eval_condition, EvalContext};

use crate::cancel::CancelToken;
use crate::credentials::Secret;

use super::{ApprovalGate, Executor, StepResult};

/// `start`: produces `input` as output, no side effects.
pub struct StartExecutor;

#[async_trait]
impl Executor for StartExecutor {
    async fn execute(
        &self,
        _step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        Ok(StepResult::new(resolved_input))
    }
}

/// The branch a `condition`/`switch` step selected, carried in its output
/// so the scheduler can activate the matching outgoing edge by port label.
pub fn branch_of(output: &serde_json::Value) -> Option<&str> {
    output.get("branch").and_then(|v| v.as_str())
}

/// `condition`: evaluates `config.expression`, exposes `true`/`false`
/// output ports.
pub struct ConditionExecutor;

#[async_trait]
impl Executor for ConditionExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let expression = step
            .config
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("condition step missing `config.expression`"))?;
        let result = eval_condition(expression, ctx)
            .map_err(|e| EngineError::new(ErrorKind::Permanent, format!("expression error: {e}")))?;
        let branch = if result { "true" } else { "false" };
        Ok(StepResult::new(serde_json::json!({
            "branch": branch,
            "value": result,
        })))
    }
}

/// `switch`: evaluates `config.expression`, routes to the matching
/// `config.cases[].label`/`config.cases[].match` entry, else `default`.
pub struct SwitchExecutor;

#[async_trait]
impl Executor for SwitchExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let expression = step
            .config
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::permanent("switch step missing `config.expression`"))?;
        let value = workflow_core::expr::resolve_path(expression, ctx).unwrap_or(serde_json::Value::Null);

        let cases = step.config.get("cases").and_then(|v| v.as_array());
        let matched = cases.and_then(|cases| {
            cases.iter().find_map(|case| {
                let label = case.get("label")?.as_str()?;
                let matches = case.get("match")?;
                (matches == &value).then(|| label.to_string())
            })
        });
        let branch = matched.unwrap_or_else(|| "default".to_string());
        Ok(StepResult::new(serde_json::json!({
            "branch": branch,
            "value": value,
        })))
    }
}

/// `join`: merges incoming parallel branches into an array or object.
/// The scheduler resolves the actual incoming values (each upstream
/// branch's output, possibly `null` if skipped per "boundary
/// behaviours") and passes them in as `resolved_input` keyed by source step
/// name; this executor only applies the configured merge shape.
pub struct JoinExecutor;

#[async_trait]
impl Executor for JoinExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let as_array = step
            .config
            .get("shape")
            .and_then(|v| v.as_str())
            .is_none_or(|s| s == "array");
        let output = if as_array {
            match resolved_input {
                serde_json::Value::Object(map) => {
                    serde_json::Value::Array(map.into_values().collect())
                }
                other => other,
            }
        } else {
            resolved_input
        };
        Ok(StepResult::new(output))
    }
}

/// `set-variables`: writes `config.assignments` (a map of `$vars.<name>` ->
/// templated/expression value) into the run context. The
/// scheduler applies the returned `vars` patch to `ctx.vars`; this executor
/// only computes the values.
pub struct SetVariablesExecutor;

#[async_trait]
impl Executor for SetVariablesExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        _cancel: &CancelToken,
    ) -> Result<StepResult> {
        let assignments = step
            .config
            .get("assignments")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let mut resolved = serde_json::Map::with_capacity(assignments.len());
        for (key, expr) in assignments {
            let value = match expr.as_str() {
                Some(path) if path.starts_with('$') => {
                    workflow_core::expr::resolve_path(path, ctx).unwrap_or(serde_json::Value::Null)
                }
                _ => expr,
            };
            resolved.insert(key, value);
        }
        Ok(StepResult::new(serde_json::Value::Object(resolved)))
    }
}

use workflow_core::compiler::MAX_WAIT_DURATION_MS;

/// `wait`: suspends for `config.duration_ms` or until `config.until` (ISO
/// timestamp), capped at one hour. The `duration_ms` form is already
/// rejected at compile time (`CompileError::WaitDurationTooLong`); this
/// check also catches `config.until` timestamps far enough out to exceed
/// the cap, and is defense-in-depth against a plan compiled before that
/// check existed.
pub struct WaitExecutor;

#[async_trait]
impl Executor for WaitExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let duration_ms = if let Some(ms) = step.config.get("duration_ms").and_then(|v| v.as_u64()) {
            ms
        } else if let Some(until) = step.config.get("until").and_then(|v| v.as_str()) {
            let target = chrono::DateTime::parse_from_rfc3339(until)
                .map_err(|e| EngineError::permanent(format!("invalid `until` timestamp: {e}")))?;
            let now = Utc::now();
            (target.with_timezone(&Utc) - now).num_milliseconds().max(0) as u64
        } else {
            return Err(EngineError::permanent("wait step missing `config.duration_ms` or `config.until`"));
        };
        if duration_ms > MAX_WAIT_DURATION_MS {
            return Err(EngineError::permanent("wait duration exceeds the 1 hour maximum"));
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(duration_ms)) => {
                Ok(StepResult::new(resolved_input))
            }
            () = cancel.cancelled() => Err(EngineError::new(ErrorKind::Cancelled, "wait step cancelled")),
        }
    }
}

/// `human_in_loop`: pauses awaiting an external approval keyed by the
/// step-run id, with a timeout.
pub struct HumanInLoopExecutor {
    gate: Arc<dyn ApprovalGate>,
    step_run_id_of: Box<dyn Fn(Uuid) -> Uuid + Send + Sync>,
}

impl HumanInLoopExecutor {
    /// `step_run_id_of` maps a step id to the current attempt's step-run
    /// id; the scheduler owns that assignment, so it is injected rather
    /// than recomputed here.
    #[must_use]
    pub fn new(gate: Arc<dyn ApprovalGate>, step_run_id_of: Box<dyn Fn(Uuid) -> Uuid + Send + Sync>) -> Self {
        Self { gate, step_run_id_of }
    }
}

#[async_trait]
impl Executor for HumanInLoopExecutor {
    async fn execute(
        &self,
        step: &CompiledStep,
        _resolved_input: serde_json::Value,
        _ctx: &EvalContext,
        _credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let timeout_ms = step.timeout_ms;
        let step_run_id = (self.step_run_id_of)(step.id);
        let decision = self.gate.await_approval(step_run_id, timeout_ms, cancel).await?;
        Ok(StepResult::new(decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::expr::EvalContext;
    use workflow_core::model::RetryConfig;

    fn step_with_config(config: serde_json::Value) -> CompiledStep {
        CompiledStep {
            id: Uuid::new_v4(),
            name: "s".into(),
            step_type: workflow_core::model::StepType::Condition,
            config,
            credential_bindings: HashMap::new(),
            retry_config: RetryConfig::default(),
            timeout_ms: 60_000,
            group_chain: Vec::new(),
        }
    }

    #[tokio::test]
    async fn condition_selects_true_branch() {
        let step = step_with_config(serde_json::json!({ "expression": "$.v > 5" }));
        let ctx = EvalContext::new(serde_json::json!({ "v": 7 }));
        let result = ConditionExecutor
            .execute(&step, serde_json::Value::Null, &ctx, &HashMap::new(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(branch_of(&result.output), Some("true"));
    }

    #[tokio::test]
    async fn switch_falls_back_to_default() {
        let step = step_with_config(serde_json::json!({
            "expression": "$.v",
            "cases": [{ "label": "big", "match": 100 }],
        }));
        let ctx = EvalContext::new(serde_json::json!({ "v": 7 }));
        let result = SwitchExecutor
            .execute(&step, serde_json::Value::Null, &ctx, &HashMap::new(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(branch_of(&result.output), Some("default"));
    }

    #[tokio::test]
    async fn wait_rejects_durations_over_one_hour() {
        let step = step_with_config(serde_json::json!({ "duration_ms": 3_600_001u64 }));
        let ctx = EvalContext::new(serde_json::Value::Null);
        let err = WaitExecutor
            .execute(&step, serde_json::Value::Null, &ctx, &HashMap::new(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, workflow_core::error::ErrorKind::Permanent);
    }
}
