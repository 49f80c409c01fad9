//! Wires a complete, runnable [`Scheduler`] for one project version out of
//! a host's shared collaborators. A
//! `subflow`/`agent` step's sibling-step and subflow calls loop back into
//! the very `Scheduler` being built here, so construction is necessarily
//! cyclic — the same `Arc::new_cyclic` shape `langgraph_core`'s checkpoint
//! saver uses to hand a graph a reference to its own runner.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use workflow_core::compiler::ExecutionPlan;
use workflow_core::error::Result;
use workflow_core::expr::EvalContext;
use workflow_exec::dispatch::llm_exec::SiblingStepRunner;
use workflow_exec::dispatch::{ApprovalGate, SubflowRunner};
use workflow_exec::credentials::{CredentialSource, CryptoCollaborator};
use workflow_exec::llm::{LlmProvider, ToolAdapter};
use workflow_exec::sandbox::Sandbox;
use workflow_exec::scheduler::{PlanLoader, Scheduler};
use workflow_exec::state_machine::StepMachine;
use workflow_exec::usage::{PriceTable, UsageRecorder};
use workflow_exec::{default_registry, ExecutorDeps};
use workflow_checkpoint::RunStore;

/// The collaborators shared by every [`Scheduler`] a host builds, regardless
/// of which project/plan it's serving.
pub struct HostCollaborators {
    pub store: Arc<dyn RunStore>,
    pub credential_source: Arc<dyn CredentialSource>,
    pub crypto: Arc<dyn CryptoCollaborator>,
    pub prices: Arc<dyn PriceTable>,
    pub plans: Arc<dyn PlanLoader>,
    pub sandbox: Arc<dyn Sandbox>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub tool_adapters: std::collections::HashMap<String, Arc<dyn ToolAdapter>>,
    pub approval_gate: Arc<dyn ApprovalGate>,
}

/// Forwards to whichever [`Scheduler`] it was handed a [`Weak`] reference
/// to, once that scheduler exists. Exists only to break the construction
/// cycle: the registry a [`Scheduler`] dispatches through needs a handle to
/// that same scheduler for `agent`/`subflow` steps.
struct SchedulerLink(Weak<Scheduler>);

impl SchedulerLink {
    fn upgrade(&self) -> Arc<Scheduler> {
        self.0.upgrade().expect("scheduler link used after its scheduler was dropped")
    }
}

#[async_trait]
impl SubflowRunner for SchedulerLink {
    async fn run_subflow(&self, tenant_id: Uuid, project_id: Uuid, input: Value) -> Result<Value> {
        self.upgrade().run_subflow(tenant_id, project_id, input).await
    }
}

#[async_trait]
impl SiblingStepRunner for SchedulerLink {
    async fn run_sibling_step(&self, step_name: &str, arguments: Value, ctx: &EvalContext) -> Result<Value> {
        self.upgrade().run_sibling_step(step_name, arguments, ctx).await
    }
}

/// Builds a [`Scheduler`] for `plan`, wiring its own `agent`/`subflow`
/// dispatch back to itself through [`SchedulerLink`].
#[must_use]
pub fn build_scheduler(plan: Arc<ExecutionPlan>, collaborators: &HostCollaborators) -> Arc<Scheduler> {
    Arc::new_cyclic(|weak| {
        let link: Arc<SchedulerLink> = Arc::new(SchedulerLink(weak.clone()));
        let deps = ExecutorDeps {
            sandbox: Arc::clone(&collaborators.sandbox),
            llm_provider: Arc::clone(&collaborators.llm_provider),
            tool_adapters: collaborators.tool_adapters.clone(),
            subflow_runner: link.clone() as Arc<dyn SubflowRunner>,
            sibling_runner: link as Arc<dyn SiblingStepRunner>,
            approval_gate: Arc::clone(&collaborators.approval_gate),
            store: Arc::clone(&collaborators.store),
        };
        let registry = Arc::new(default_registry(deps));
        let usage = Arc::new(UsageRecorder::new(Arc::clone(&collaborators.store), Arc::clone(&collaborators.prices)));
        let machine = Arc::new(StepMachine::new(registry, Arc::clone(&collaborators.store), usage));
        Scheduler::new(
            plan,
            machine,
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.credential_source),
            Arc::clone(&collaborators.crypto),
            Arc::clone(&collaborators.plans),
            Arc::clone(&collaborators.prices),
        )
    })
}
