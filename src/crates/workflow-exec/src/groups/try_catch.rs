//! `try_catch`: runs the body sequentially under a group-level retry
//! budget; an unrecovered
//! failure is reported on the group's `catch` port rather than `output`,
//! which the scheduler's edge activation reads the same way it reads
//! [`crate::dispatch::control::branch_of`] for `condition`/`switch`.

use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use workflow_core::compiler::CompiledGroup;
use workflow_core::error::{EngineError, ErrorKind};

use crate::cancel::CancelToken;
use crate::context::RunContext;

use super::{run_body_sequential, GroupOutcome, StepRunner};

pub async fn run(
    group: &CompiledGroup,
    input: serde_json::Value,
    ctx: &mut RunContext,
    names: &HashMap<Uuid, String>,
    runner: &dyn StepRunner,
    cancel: &CancelToken,
) -> GroupOutcome {
    let retry_count = group.config.get("retry_count").and_then(serde_json::Value::as_u64).unwrap_or(0);
    let retry_delay_ms = group.config.get("retry_delay_ms").and_then(serde_json::Value::as_u64).unwrap_or(0);

    let mut last_error = None;
    for attempt in 0..=retry_count {
        if cancel.is_cancelled() {
            return GroupOutcome::cancelled();
        }
        match run_body_sequential(&group.body, input.clone(), ctx, names, runner, cancel).await {
            Ok(output) => return GroupOutcome::succeeded(output),
            Err(error) => {
                let retryable = error.kind.is_retryable();
                last_error = Some(error);
                if !retryable || attempt == retry_count {
                    break;
                }
                if retry_delay_ms > 0 {
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(retry_delay_ms)) => {}
                        () = cancel.cancelled() => return GroupOutcome::cancelled(),
                    }
                }
            }
        }
    }

    let error = last_error.unwrap_or_else(|| EngineError::new(ErrorKind::Permanent, "try_catch body failed with no error detail"));
    if error.kind == ErrorKind::Cancelled {
        return GroupOutcome::cancelled();
    }
    GroupOutcome::failed(error, "catch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use workflow_core::model::{GroupType, NodeRef, StepRunStatus};

    struct AlwaysFails;

    #[async_trait]
    impl StepRunner for AlwaysFails {
        async fn run_step(
            &self,
            _node: NodeRef,
            _input: serde_json::Value,
            _ctx: &mut RunContext,
            _cancel: &CancelToken,
        ) -> crate::state_machine::StepOutcome {
            crate::state_machine::StepOutcome {
                status: StepRunStatus::Failed,
                output: None,
                error: Some(EngineError::permanent("boom")),
                attempts: 1,
                usage: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn routes_to_catch_port_on_unrecovered_failure() {
        let body_id = Uuid::new_v4();
        let group = CompiledGroup {
            id: Uuid::new_v4(),
            group_type: GroupType::TryCatch,
            config: serde_json::json!({}),
            parent_group_id: None,
            pre_process: None,
            post_process: None,
            body: vec![NodeRef::Step { id: body_id }],
        };
        let mut names = HashMap::new();
        names.insert(body_id, "risky".to_string());
        let mut ctx = RunContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), serde_json::Value::Null, HashMap::new(), HashMap::new(), HashMap::new());

        let outcome = run(&group, serde_json::Value::Null, &mut ctx, &names, &AlwaysFails, &CancelToken::new()).await;
        assert_eq!(outcome.port, "catch");
        assert_eq!(outcome.status, StepRunStatus::Failed);
    }
}
