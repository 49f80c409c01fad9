//! `workflow-exec`: everything downstream of the compiled plan — credential
//! resolution (C3), block dispatch (C4), the step state machine (C5), group
//! interpreters (C6), the run scheduler (C7), and usage/cost recording
//! (C9). `workflow-host` drives a [`scheduler::Scheduler`] per claimed run;
//! nothing in this crate talks to a queue or a transport directly.

pub mod cancel;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod groups;
pub mod llm;
pub mod sandbox;
pub mod scheduler;
pub mod state_machine;
pub mod usage;

use std::collections::HashMap;
use std::sync::Arc;

use dispatch::control::{
    ConditionExecutor, HumanInLoopExecutor, JoinExecutor, SetVariablesExecutor, StartExecutor, SwitchExecutor,
    WaitExecutor,
};
use dispatch::code::{CodeExecutor, FunctionExecutor};
use dispatch::llm_exec::{AgentExecutor, LlmExecutor, RouterExecutor, SiblingStepRunner};
use dispatch::tool_exec::{MapExecutor, SubflowExecutor, ToolExecutor};
use dispatch::{ApprovalGate, ExecutorRegistry, SubflowRunner};
use llm::{LlmProvider, ToolAdapter};
use sandbox::Sandbox;
use workflow_checkpoint::RunStore;
use workflow_core::model::StepType;

/// Every collaborator [`default_registry`] needs to wire up a complete
/// registry. A host assembles one of
/// these once and shares it across every run.
pub struct ExecutorDeps {
    pub sandbox: Arc<dyn Sandbox>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub tool_adapters: HashMap<String, Arc<dyn ToolAdapter>>,
    pub subflow_runner: Arc<dyn SubflowRunner>,
    pub sibling_runner: Arc<dyn SiblingStepRunner>,
    pub approval_gate: Arc<dyn ApprovalGate>,
    pub store: Arc<dyn RunStore>,
}

/// Builds the registry with every [`StepType`] variant wired to its
/// built-in executor. `subflow_runner`/`sibling_runner` are
/// normally the same [`scheduler::Scheduler`] instance the registry itself
/// ends up dispatched through, since both traits exist only to break that
/// circular dependency.
#[must_use]
pub fn default_registry(deps: ExecutorDeps) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(StepType::Start, Arc::new(StartExecutor));
    registry.register(StepType::Condition, Arc::new(ConditionExecutor));
    registry.register(StepType::Switch, Arc::new(SwitchExecutor));
    registry.register(StepType::Join, Arc::new(JoinExecutor));
    registry.register(StepType::SetVariables, Arc::new(SetVariablesExecutor));
    registry.register(StepType::Wait, Arc::new(WaitExecutor));
    registry.register(
        StepType::HumanInLoop,
        Arc::new(HumanInLoopExecutor::new(deps.approval_gate, Box::new(|_step_id| uuid::Uuid::new_v4()))),
    );
    registry.register(StepType::Code, Arc::new(CodeExecutor::new(Arc::clone(&deps.sandbox))));
    registry.register(StepType::Function, Arc::new(FunctionExecutor::new(deps.sandbox)));
    registry.register(StepType::Llm, Arc::new(LlmExecutor::new(Arc::clone(&deps.llm_provider))));
    registry.register(StepType::Router, Arc::new(RouterExecutor::new(Arc::clone(&deps.llm_provider))));
    registry.register(
        StepType::Agent,
        Arc::new(AgentExecutor::new(deps.llm_provider, deps.store, deps.sibling_runner)),
    );
    registry.register(StepType::Tool, Arc::new(ToolExecutor::new(deps.tool_adapters.clone())));
    registry.register(StepType::Map, Arc::new(MapExecutor::new(deps.tool_adapters)));
    registry.register(StepType::Subflow, Arc::new(SubflowExecutor::new(deps.subflow_runner)));
    registry
}
