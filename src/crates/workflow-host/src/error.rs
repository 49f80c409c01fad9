//! `workflow-host`'s own error type, layered the same way
//! `workflow-triggers::error::TriggerError` is: local variants that convert
//! into [`EngineError`] at the boundary the scheduler already understands.

use thiserror::Error;
use uuid::Uuid;
use workflow_core::error::EngineError;

#[derive(Debug, Error, Clone)]
pub enum HostError {
    #[error("project {tenant_id}/{project_id} has no registered plan")]
    PlanNotRegistered { tenant_id: Uuid, project_id: Uuid },
    #[error("graph failed to compile: {0}")]
    Compile(#[from] workflow_core::compiler::CompileError),
    #[error(transparent)]
    Store(#[from] workflow_checkpoint::error::StoreError),
    #[error(transparent)]
    Trigger(#[from] workflow_triggers::TriggerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, HostError>;
