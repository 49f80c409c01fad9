//! `while`: repeats the body
//! while `config.condition` is truthy, capped at `config.max_iterations`
//! (default 100); `config.do_while` runs the body once before the first
//! check.

use std::collections::HashMap;
use uuid::Uuid;

use workflow_core::compiler::CompiledGroup;
use workflow_core::error::{EngineError, ErrorKind};
use workflow_core::expr::eval_condition;

use crate::cancel::CancelToken;
use crate::context::RunContext;

use super::{run_body_sequential, GroupOutcome, StepRunner};

const DEFAULT_MAX_ITERATIONS: u64 = 100;

pub async fn run(
    group: &CompiledGroup,
    input: serde_json::Value,
    ctx: &mut RunContext,
    names: &HashMap<Uuid, String>,
    runner: &dyn StepRunner,
    cancel: &CancelToken,
) -> GroupOutcome {
    let condition = match group.config.get("condition").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => return GroupOutcome::failed(EngineError::permanent("while group missing `config.condition`"), "output"),
    };
    let max_iterations = group
        .config
        .get("max_iterations")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_MAX_ITERATIONS);
    let do_while = group.config.get("do_while").and_then(serde_json::Value::as_bool).unwrap_or(false);

    let mut value = input;
    let mut iteration = 0u64;
    loop {
        if cancel.is_cancelled() {
            return GroupOutcome::cancelled();
        }
        let should_run = if iteration == 0 && do_while {
            true
        } else {
            match eval_condition(condition, &ctx.public_snapshot()) {
                Ok(truthy) => truthy,
                Err(e) => return GroupOutcome::failed(EngineError::permanent(format!("while.condition error: {e}")), "output"),
            }
        };
        if !should_run {
            break;
        }
        if iteration >= max_iterations {
            return GroupOutcome::failed(
                EngineError::new(ErrorKind::MaxIterationsExceeded, format!("while loop exceeded max_iterations ({max_iterations})")),
                "output",
            );
        }

        match run_body_sequential(&group.body, value.clone(), ctx, names, runner, cancel).await {
            Ok(output) => value = output,
            Err(error) => return GroupOutcome::failed(error, "output"),
        }
        ctx.set_var("index", serde_json::json!(iteration));
        iteration += 1;
    }

    GroupOutcome::succeeded(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use workflow_core::model::{GroupType, NodeRef, StepRunStatus};

    struct Increment;

    #[async_trait]
    impl StepRunner for Increment {
        async fn run_step(
            &self,
            _node: NodeRef,
            input: serde_json::Value,
            _ctx: &mut RunContext,
            _cancel: &CancelToken,
        ) -> crate::state_machine::StepOutcome {
            let v = input.get("n").and_then(serde_json::Value::as_i64).unwrap_or(0);
            crate::state_machine::StepOutcome {
                status: StepRunStatus::Succeeded,
                output: Some(serde_json::json!({ "n": v + 1 })),
                error: None,
                attempts: 1,
                usage: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn loops_until_condition_fails() {
        let body_id = Uuid::new_v4();
        let group = CompiledGroup {
            id: Uuid::new_v4(),
            group_type: GroupType::While,
            config: serde_json::json!({ "condition": "$steps.counter.output.n < 3" }),
            parent_group_id: None,
            pre_process: None,
            post_process: None,
            body: vec![NodeRef::Step { id: body_id }],
        };
        let mut names = HashMap::new();
        names.insert(body_id, "counter".to_string());
        let mut ctx = RunContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::Value::Null,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        );
        ctx.record_step_output("counter", serde_json::json!({ "n": 0 }));
        let outcome = run(&group, serde_json::json!({ "n": 0 }), &mut ctx, &names, &Increment, &CancelToken::new()).await;
        assert_eq!(outcome.output, serde_json::json!({ "n": 3 }));
    }

    #[tokio::test]
    async fn exceeding_max_iterations_raises_distinguishable_kind() {
        let body_id = Uuid::new_v4();
        let group = CompiledGroup {
            id: Uuid::new_v4(),
            group_type: GroupType::While,
            config: serde_json::json!({ "condition": "true", "max_iterations": 2 }),
            parent_group_id: None,
            pre_process: None,
            post_process: None,
            body: vec![NodeRef::Step { id: body_id }],
        };
        let mut names = HashMap::new();
        names.insert(body_id, "counter".to_string());
        let mut ctx = RunContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::Value::Null,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        );
        let outcome = run(&group, serde_json::Value::Null, &mut ctx, &names, &Increment, &CancelToken::new()).await;
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::MaxIterationsExceeded);
    }
}
