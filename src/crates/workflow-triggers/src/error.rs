//! Trigger-ingress errors. Every variant maps onto an
//! [`ErrorKind`] the rest of the engine already understands rather than
//! growing a parallel taxonomy the way `orca::api::error::ApiError` wraps
//! `sqlx`/`validator` failures into one enum at the HTTP boundary.

use thiserror::Error;
use uuid::Uuid;
use workflow_core::error::{EngineError, ErrorKind};

#[derive(Debug, Error, Clone)]
pub enum TriggerError {
    #[error("start step {0} not found in project")]
    StartStepNotFound(Uuid),
    #[error("resume target {0} not found in project")]
    TargetNodeNotFound(Uuid),
    #[error("project has multiple start steps; start_step_id is required")]
    AmbiguousStartStep,
    #[error("start step {0} does not accept trigger kind {1:?}")]
    WrongTriggerKind(Uuid, workflow_core::model::TriggerType),
    #[error("webhook signature missing or malformed")]
    BadSignature,
    #[error("webhook signature does not match payload")]
    SignatureMismatch,
    #[error("webhook timestamp outside the replay window")]
    ReplayWindowExceeded,
    #[error("payload failed schema validation: {0:?}")]
    SchemaValidation(Vec<SchemaViolation>),
    #[error("underlying store error: {0}")]
    Store(#[from] workflow_checkpoint::error::StoreError),
}

/// One `{field, message}` schema violation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaViolation {
    pub field: String,
    pub message: String,
}

impl From<TriggerError> for EngineError {
    fn from(err: TriggerError) -> Self {
        let kind = match &err {
            TriggerError::SchemaValidation(_) => ErrorKind::SchemaValidation,
            TriggerError::BadSignature | TriggerError::SignatureMismatch | TriggerError::ReplayWindowExceeded => {
                ErrorKind::Forbidden
            }
            _ => ErrorKind::GraphInvalid,
        };
        EngineError::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriggerError>;
