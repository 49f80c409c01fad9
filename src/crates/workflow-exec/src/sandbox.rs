//! The code sandbox contract: the collaborator `code` and
//! `function` steps dispatch into. The engine never embeds a JS runtime
//! itself — sandboxing is delegated behind a trait object the same way
//! code-execution capability behind a trait object rather than linking a
//! scripting engine into `langgraph-core`.

use async_trait::async_trait;
use std::collections::HashMap;
use workflow_core::error::{EngineError, ErrorKind, Result};

/// Capabilities injected into a sandboxed execution, each itself bounded by
/// tenant limits.
#[derive(Debug, Clone, Default)]
pub struct SandboxCapabilities {
    /// Whether `ctx.http` is available to the script.
    pub allow_http: bool,
    /// The step's own resolved credential bindings, exposed read-only as
    /// `ctx.secrets` — never the full tenant secret store.
    pub secrets: HashMap<String, String>,
    /// Whether `ctx.db` (vector/RAG capability) is available.
    pub allow_db: bool,
}

/// Distinguishes sandbox failure modes so the step state
/// machine can classify them (`Timeout`/`Transient` retry, `Permanent`
/// does not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxFailureMode {
    Timeout,
    MemoryLimit,
    Permanent,
}

/// The result of a sandboxed execution: the script's return value plus any
/// captured console output.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub output: serde_json::Value,
    pub logs: Vec<String>,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `code` with `input` bound as the script's argument, under
    /// `capabilities`, honoring `timeout_ms`. Returns `Err` classified via
    /// [`SandboxFailureMode`] embedded in the [`EngineError`] kind.
    async fn execute(
        &self,
        code: &str,
        input: serde_json::Value,
        capabilities: &SandboxCapabilities,
        timeout_ms: u64,
    ) -> Result<SandboxOutput>;
}

/// Error classification helper shared by every [`Sandbox`] implementation.
#[must_use]
pub fn classify_sandbox_failure(mode: SandboxFailureMode, message: impl Into<String>) -> EngineError {
    let kind = match mode {
        SandboxFailureMode::Timeout => ErrorKind::Timeout,
        SandboxFailureMode::MemoryLimit => ErrorKind::Transient,
        SandboxFailureMode::Permanent => ErrorKind::Permanent,
    };
    EngineError::new(kind, message)
}
