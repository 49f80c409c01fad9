//! Block Executor Dispatch (C4): routes a compiled step to the executor
//! registered for its [`StepType`], under the uniform contract 
//! fixes — `execute(step, resolved_input, ctx, credentials) -> StepResult`
//! — the same data-driven dispatch shape as the
//! `langgraph_core::pregel::types::NodeExecutor` registry, generalized
//! from "one proc per graph node" to "one executor per step type tag".

pub mod code;
pub mod control;
pub mod llm_exec;
pub mod tool_exec;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::{EngineError, ErrorKind, Result};
use workflow_core::expr::EvalContext;
use workflow_core::model::{StepType, StreamChunk, UsageRecord};

use crate::cancel::CancelToken;
use crate::credentials::Secret;

/// What an executor hands back to the state machine.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub output: serde_json::Value,
    pub usage: Option<UsageRecord>,
    /// Eagerly collected rather than a true lazy stream: this crate has no
    /// transport to push partial chunks to a subscriber mid-step, so an
    /// executor that wants streaming semantics appends through
    /// [`StepResult::streaming_chunks`] and the state machine persists them
    /// via `RunStore::append_stream_chunk` once the step completes.
    pub streaming_chunks: Vec<StreamChunk>,
}

impl StepResult {
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            usage: None,
            streaming_chunks: Vec::new(),
        }
    }
}

/// Synchronously runs another project as a child run.
/// Implemented by the scheduler and injected here to avoid a dependency
/// cycle between dispatch and the component that owns compilation.
#[async_trait]
pub trait SubflowRunner: Send + Sync {
    async fn run_subflow(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        input: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Waits for an external `ApproveHumanInLoop` call keyed by step-run id.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn await_approval(
        &self,
        step_run_id: Uuid,
        timeout_ms: u64,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value>;
}

/// A gate that approves immediately with the input unchanged, for tests and
/// `TestStepInline`.
pub struct ImmediateApproval;

#[async_trait]
impl ApprovalGate for ImmediateApproval {
    async fn await_approval(
        &self,
        _step_run_id: Uuid,
        _timeout_ms: u64,
        _cancel: &CancelToken,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

/// One entry of the dispatch registry.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult>;
}

/// The data-driven `type -> executor` map, built once per host
/// and shared across every run.
pub struct ExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, step_type: StepType, executor: Arc<dyn Executor>) {
        self.executors.insert(step_type, executor);
    }

    /// Dispatch to the registered executor for `step.step_type`.
    ///
    /// # Errors
    ///
    /// `ErrorKind::Permanent` if no executor is registered for the type —
    /// this should only happen for a taxonomy gap in host wiring, never in
    /// normal operation, since every [`StepType`] variant has a built-in
    /// registration (see [`crate::default_registry`]).
    pub async fn dispatch(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let executor = self.executors.get(&step.step_type).ok_or_else(|| {
            EngineError::new(
                ErrorKind::Permanent,
                format!("no executor registered for step type {:?}", step.step_type),
            )
        })?;
        executor.execute(step, resolved_input, ctx, credentials, cancel).await
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
