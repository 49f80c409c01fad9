//! Errors raised by the `RunStore` collaborator.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("project version {project_id}@{version} not found")]
    ProjectVersionNotFound { project_id: Uuid, version: u32 },
    #[error("operation crosses tenant boundary")]
    CrossTenant,
    #[error("idempotency key `{0}` already bound to a run")]
    DuplicateIdempotencyKey(String),
    #[error("optimistic concurrency conflict on run {run_id} (expected version {expected}, found {found})")]
    VersionConflict {
        run_id: Uuid,
        expected: u64,
        found: u64,
    },
    #[error("no pending runs available to claim")]
    NothingToClaim,
    #[error("lease for run {0} has already expired or was never held")]
    LeaseNotHeld(Uuid),
}

pub type Result<T> = std::result::Result<T, StoreError>;
