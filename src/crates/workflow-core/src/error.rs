//! The engine-wide error taxonomy.
//!
//! Every failure that can surface from a run — a bad expression, an invalid
//! graph, a credential that expired, a step that ran out of budget — is
//! carried as an [`EngineError`] tagged with an [`ErrorKind`]. The kind is
//! what the scheduler (`workflow-exec`) and the step state machine inspect
//! to decide whether a failure is retryable; the message is for humans.
//!
//! Components that need their own local error type (the expression parser,
//! the graph compiler) define one and convert it into an [`EngineError`] at
//! the boundary, the same way `langgraph_core::error::GraphError` wraps
//! lower-level failures while remaining one `match`-able enum for callers.

use thiserror::Error;

/// Classification of a failure, used by the step state machine (C5) to
/// decide retry eligibility and by the scheduler (C7) to decide whether a
/// failure routes to an enclosing `try_catch` or fails the run outright.
///
/// See "Error taxonomy".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable after backoff: network timeouts, 5xx from external collaborators,
    /// sandbox OOM under the configured limit.
    Transient,
    /// Retryable, counts against the step's retry budget.
    Timeout,
    /// Retryable with (jittered) backoff: 429 responses from priced APIs.
    RateLimit,
    /// Not retryable; surfaced to the run.
    Permanent,
    /// A step's credential binding could not be resolved (expired, revoked,
    /// or missing). Permanent.
    CredentialUnavailable,
    /// The project graph failed compilation. Permanent, pre-run.
    GraphInvalid,
    /// A trigger payload failed schema validation. Permanent, pre-run.
    SchemaValidation,
    /// A tenant/capability boundary was violated.
    Forbidden,
    /// The applicable cost budget would be exceeded by this call.
    BudgetExceeded,
    /// A `while` group ran its body `max_iterations` times without the
    /// condition going false. Permanent.
    MaxIterationsExceeded,
    /// The run or step was cancelled. Terminal, not treated as a failure.
    Cancelled,
}

impl ErrorKind {
    /// Whether the step state machine should consider scheduling a further
    /// attempt for a failure of this kind, independent of `retry_config`.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::RateLimit)
    }

    /// Whether this kind is a genuine error, as opposed to the cooperative
    /// cancellation terminal state.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// The engine's unified error type. Carries enough context (`step_name`,
/// `attempt`) to bind `$error` inside a `try_catch` region without the
/// scheduler re-deriving it.
#[derive(Debug, Error, Clone, serde::Serialize, serde::Deserialize)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    /// The error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Name of the step that raised the error, if any.
    pub step_name: Option<String>,
    /// Attempt number the error occurred on, if any.
    pub attempt: Option<u32>,
}

impl EngineError {
    /// Construct an error with no step/attempt context (compile-time or
    /// pre-run failures).
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_name: None,
            attempt: None,
        }
    }

    /// Attach step/attempt context, used by the state machine when a step
    /// executor returns a bare [`ErrorKind`].
    #[must_use]
    pub fn with_step(mut self, step_name: impl Into<String>, attempt: u32) -> Self {
        self.step_name = Some(step_name.into());
        self.attempt = Some(attempt);
        self
    }

    /// Shorthand for `ErrorKind::GraphInvalid`.
    pub fn graph_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GraphInvalid, message)
    }

    /// Shorthand for `ErrorKind::Permanent`.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Shorthand for `ErrorKind::Forbidden`.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// The `$error` value bound inside a `try_catch` catch region.
    #[must_use]
    pub fn to_context_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "message": self.message,
            "step_name": self.step_name,
            "attempt": self.attempt,
        })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;
