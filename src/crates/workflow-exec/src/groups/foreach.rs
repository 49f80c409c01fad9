//! `foreach`: resolves `config.input_path` to an array
//! and runs the body once per element, binding `$vars.item`/`$vars.index`
//! (the simplified model has no per-iteration scope beyond `$vars`).
//! `config.parallel` with `config.max_workers` controls concurrency;
//! output preserves input order regardless.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::compiler::CompiledGroup;
use workflow_core::error::EngineError;
use workflow_core::expr::resolve_path;

use crate::cancel::CancelToken;
use crate::context::RunContext;

use super::{run_body_sequential, GroupOutcome, StepRunner};

pub async fn run(
    group: &CompiledGroup,
    ctx: &mut RunContext,
    names: &HashMap<Uuid, String>,
    runner: Arc<dyn StepRunner>,
    cancel: &CancelToken,
) -> GroupOutcome {
    let input_path = group
        .config
        .get("input_path")
        .and_then(|v| v.as_str())
        .unwrap_or("$input");
    let items = match resolve_path(input_path, &ctx.public_snapshot()) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) => {
            return GroupOutcome::failed(
                EngineError::permanent(format!("foreach.input_path `{input_path}` did not resolve to an array")),
                "output",
            )
        }
        Err(e) => return GroupOutcome::failed(EngineError::permanent(format!("foreach.input_path error: {e}")), "output"),
    };

    let parallel = group.config.get("parallel").and_then(serde_json::Value::as_bool).unwrap_or(false);
    let max_workers = group.config.get("max_workers").and_then(serde_json::Value::as_u64).map_or(usize::MAX, |n| n as usize);

    if !parallel {
        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return GroupOutcome::cancelled();
            }
            let mut iter_ctx = ctx.clone();
            iter_ctx.set_var("item", item.clone());
            iter_ctx.set_var("index", serde_json::json!(index));
            match run_body_sequential(&group.body, item, &mut iter_ctx, names, runner.as_ref(), cancel).await {
                Ok(output) => outputs.push(output),
                Err(error) => return GroupOutcome::failed(error, "output"),
            }
        }
        return GroupOutcome::succeeded(serde_json::Value::Array(outputs));
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_workers.min(items.len().max(1))));
    let mut handles = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let runner = Arc::clone(&runner);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let mut iter_ctx = ctx.clone();
        iter_ctx.set_var("item", item.clone());
        iter_ctx.set_var("index", serde_json::json!(index));
        let body = group.body.clone();
        let names = names.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let result = run_body_sequential(&body, item, &mut iter_ctx, &names, runner.as_ref(), &cancel).await;
            (index, result)
        }));
    }

    let mut outputs: Vec<Option<serde_json::Value>> = vec![None; handles.len()];
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok((index, Ok(output))) => outputs[index] = Some(output),
            Ok((_, Err(error))) => {
                first_error.get_or_insert(error);
            }
            Err(join_err) => {
                first_error.get_or_insert_with(|| EngineError::permanent(format!("foreach iteration panicked: {join_err}")));
            }
        }
    }
    if let Some(error) = first_error {
        return GroupOutcome::failed(error, "output");
    }
    GroupOutcome::succeeded(serde_json::Value::Array(
        outputs.into_iter().map(|o| o.unwrap_or(serde_json::Value::Null)).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use workflow_core::model::{GroupType, NodeRef, StepRunStatus};

    struct Doubler;

    #[async_trait]
    impl StepRunner for Doubler {
        async fn run_step(
            &self,
            _node: NodeRef,
            input: serde_json::Value,
            _ctx: &mut RunContext,
            _cancel: &CancelToken,
        ) -> crate::state_machine::StepOutcome {
            let v = input.as_i64().unwrap_or(0);
            crate::state_machine::StepOutcome {
                status: StepRunStatus::Succeeded,
                output: Some(serde_json::json!(v * 2)),
                error: None,
                attempts: 1,
                usage: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn preserves_input_order_when_parallel() {
        let body_id = Uuid::new_v4();
        let group = CompiledGroup {
            id: Uuid::new_v4(),
            group_type: GroupType::Foreach,
            config: serde_json::json!({ "input_path": "$input", "parallel": true, "max_workers": 2 }),
            parent_group_id: None,
            pre_process: None,
            post_process: None,
            body: vec![NodeRef::Step { id: body_id }],
        };
        let mut names = HashMap::new();
        names.insert(body_id, "double".to_string());
        let mut ctx = RunContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            serde_json::json!([1, 2, 3]),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        );
        let outcome = run(&group, &mut ctx, &names, Arc::new(Doubler), &CancelToken::new()).await;
        assert_eq!(outcome.output, serde_json::json!([2, 4, 6]));
    }
}
