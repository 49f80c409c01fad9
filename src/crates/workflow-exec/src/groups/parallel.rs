//! `parallel`: runs every body step concurrently from the
//! same group input, up to `config.max_concurrent` (default unlimited),
//! aggregating outputs into an object keyed by step name.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::compiler::CompiledGroup;
use workflow_core::error::EngineError;
use workflow_core::model::{NodeRef, StepRunStatus};

use crate::cancel::CancelToken;
use crate::context::RunContext;

use super::{GroupOutcome, StepRunner};

/// Runs `group`'s body concurrently. `names` maps each body step id to its
/// name, for keying the aggregated output object and for recording
/// `$steps.<name>` as each branch completes.
pub async fn run(
    group: &CompiledGroup,
    input: serde_json::Value,
    ctx: &RunContext,
    names: &HashMap<Uuid, String>,
    runner: Arc<dyn StepRunner>,
    cancel: &CancelToken,
) -> GroupOutcome {
    let max_concurrent = match group.config.get("max_concurrent").and_then(serde_json::Value::as_u64) {
        Some(0) => {
            return GroupOutcome::failed(
                EngineError::permanent("parallel.max_concurrent must be greater than zero"),
                "output",
            )
        }
        Some(n) => Some(n as usize),
        None => None,
    };
    let fail_fast = group
        .config
        .get("fail_fast")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true);

    let semaphore = max_concurrent.map(|n| Arc::new(tokio::sync::Semaphore::new(n)));
    let group_cancel = CancelToken::new();
    let mut handles = Vec::with_capacity(group.body.len());

    for node in group.body.clone() {
        let runner = Arc::clone(&runner);
        let mut ctx = ctx.clone();
        let input = input.clone();
        let semaphore = semaphore.clone();
        let outer_cancel = cancel.clone();
        let group_cancel = group_cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = match &semaphore {
                Some(s) => Some(s.clone().acquire_owned().await.expect("semaphore not closed")),
                None => None,
            };
            if outer_cancel.is_cancelled() || group_cancel.is_cancelled() {
                return (node, None);
            }
            let outcome = runner.run_step(node.clone(), input, &mut ctx, &outer_cancel).await;
            (node, Some(outcome))
        }));
    }

    let mut aggregated = serde_json::Map::with_capacity(handles.len());
    let mut first_error: Option<EngineError> = None;
    let mut any_cancelled = false;

    for handle in handles {
        let (node, outcome) = match handle.await {
            Ok(pair) => pair,
            Err(join_err) => {
                first_error.get_or_insert(EngineError::permanent(format!("parallel branch panicked: {join_err}")));
                continue;
            }
        };
        let Some(outcome) = outcome else { continue };
        let name = super::node_label(&node, names);
        match outcome.status {
            StepRunStatus::Succeeded => {
                aggregated.insert(name, outcome.output.unwrap_or(serde_json::Value::Null));
            }
            StepRunStatus::Cancelled => {
                any_cancelled = true;
            }
            _ => {
                if fail_fast {
                    group_cancel.cancel();
                }
                first_error.get_or_insert_with(|| {
                    outcome.error.unwrap_or_else(|| EngineError::permanent("parallel branch failed with no error detail"))
                });
            }
        }
    }

    if any_cancelled && first_error.is_none() {
        return GroupOutcome::cancelled();
    }
    match first_error {
        Some(error) => GroupOutcome::failed(error, "output"),
        None => GroupOutcome::succeeded(serde_json::Value::Object(aggregated)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use workflow_core::model::GroupType;

    struct SleepyRunner;

    #[async_trait]
    impl StepRunner for SleepyRunner {
        async fn run_step(
            &self,
            node: NodeRef,
            _input: serde_json::Value,
            _ctx: &mut RunContext,
            _cancel: &CancelToken,
        ) -> crate::state_machine::StepOutcome {
            tokio::time::sleep(Duration::from_millis(20)).await;
            crate::state_machine::StepOutcome {
                status: StepRunStatus::Succeeded,
                output: Some(serde_json::json!(node.id().to_string())),
                error: None,
                attempts: 1,
                usage: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn runs_all_branches_concurrently_and_aggregates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let group = CompiledGroup {
            id: Uuid::new_v4(),
            group_type: GroupType::Parallel,
            config: serde_json::json!({}),
            parent_group_id: None,
            pre_process: None,
            post_process: None,
            body: vec![NodeRef::Step { id: a }, NodeRef::Step { id: b }],
        };
        let mut names = HashMap::new();
        names.insert(a, "a".to_string());
        names.insert(b, "b".to_string());
        let ctx = RunContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), serde_json::Value::Null, HashMap::new(), HashMap::new(), HashMap::new());

        let started = std::time::Instant::now();
        let outcome = run(&group, serde_json::Value::Null, &ctx, &names, Arc::new(SleepyRunner), &CancelToken::new()).await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(outcome.status, StepRunStatus::Succeeded);
        assert!(outcome.output.get("a").is_some());
        assert!(outcome.output.get("b").is_some());
    }
}
