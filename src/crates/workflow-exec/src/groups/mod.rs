//! Group Interpreters (C6): semantics for `parallel`, `try_catch`,
//! `foreach`, `while`. Each interpreter runs a group's
//! body — the nodes the compiler already ordered topologically in
//! [`CompiledGroup::body`] — through a [`StepRunner`] the scheduler
//! implements. A body entry may be a plain step or a nested
//! [`workflow_core::model::NodeRef::Group`]; [`StepRunner::run_step`]
//! dispatches the latter back into the scheduler's group-running path, so
//! an inner group's body drives through its own interpreter rather than
//! being flattened into the outer one.

pub mod foreach;
pub mod parallel;
pub mod try_catch;
pub mod while_loop;

use async_trait::async_trait;
use uuid::Uuid;

use workflow_core::error::EngineError;
use workflow_core::model::{NodeRef, StepRunStatus};

use crate::cancel::CancelToken;
use crate::context::RunContext;
use crate::state_machine::StepOutcome;

/// Runs one body node (step or nested group) to a terminal outcome.
/// Implemented by the scheduler, which alone owns step-run-id assignment,
/// retry policy lookup, and `ctx` commit serialisation. `ctx` is mutable
/// because a nested group's interpreter needs to record its own body
/// steps' outputs as it runs them, the same way the top-level loop does.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        node: NodeRef,
        input: serde_json::Value,
        ctx: &mut RunContext,
        cancel: &CancelToken,
    ) -> StepOutcome;
}

/// The synthetic name recorded in `$steps` for a group's own output,
/// shared between the top-level scheduler and the group interpreters.
#[must_use]
pub(crate) fn group_label(id: Uuid) -> String {
    format!("__group_{id}__")
}

/// Resolves a body node's recording name: a step's real name, or a nested
/// group's synthetic [`group_label`].
#[must_use]
pub(crate) fn node_label(node: &NodeRef, names: &std::collections::HashMap<Uuid, String>) -> String {
    match node {
        NodeRef::Step { id } => names.get(id).cloned().unwrap_or_else(|| id.to_string()),
        NodeRef::Group { id } => group_label(*id),
    }
}

/// What a group produced, including which outgoing port the scheduler
/// should activate from the group's virtual node — `"output"` on success,
/// `"catch"`/`"finally"` for a `try_catch` that routed to its catch region.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub status: StepRunStatus,
    pub output: serde_json::Value,
    pub error: Option<EngineError>,
    pub port: String,
}

impl GroupOutcome {
    #[must_use]
    pub fn succeeded(output: serde_json::Value) -> Self {
        Self {
            status: StepRunStatus::Succeeded,
            output,
            error: None,
            port: "output".to_string(),
        }
    }

    #[must_use]
    pub fn failed(error: EngineError, port: impl Into<String>) -> Self {
        Self {
            status: StepRunStatus::Failed,
            output: error.to_context_value(),
            error: Some(error),
            port: port.into(),
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            status: StepRunStatus::Cancelled,
            output: serde_json::Value::Null,
            error: Some(EngineError::new(workflow_core::error::ErrorKind::Cancelled, "group cancelled")),
            port: "output".to_string(),
        }
    }
}

/// Runs `body` sequentially, piping each node's resolved output forward as
/// the next node's `input` and recording it into `ctx` so later steps'
/// expressions can see `$steps.<name>` (or, for a nested group,
/// `$steps.__group_<id>__`). Used by `try_catch` and the non-parallel
/// branch of `foreach`/`while`.
pub(crate) async fn run_body_sequential(
    body: &[NodeRef],
    mut value: serde_json::Value,
    ctx: &mut RunContext,
    names: &std::collections::HashMap<Uuid, String>,
    runner: &dyn StepRunner,
    cancel: &CancelToken,
) -> Result<serde_json::Value, EngineError> {
    for node in body {
        if cancel.is_cancelled() {
            return Err(EngineError::new(workflow_core::error::ErrorKind::Cancelled, "group body cancelled"));
        }
        let outcome = runner.run_step(node.clone(), value.clone(), ctx, cancel).await;
        match outcome.status {
            StepRunStatus::Succeeded => {
                let output = outcome.output.unwrap_or(serde_json::Value::Null);
                ctx.record_step_output(node_label(node, names), output.clone());
                value = output;
            }
            StepRunStatus::Cancelled => {
                return Err(outcome
                    .error
                    .unwrap_or_else(|| EngineError::new(workflow_core::error::ErrorKind::Cancelled, "body step cancelled")))
            }
            _ => {
                return Err(outcome
                    .error
                    .unwrap_or_else(|| EngineError::permanent("body step failed with no error detail")))
            }
        }
    }
    Ok(value)
}
