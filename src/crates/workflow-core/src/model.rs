//! The data model shared by every component: projects, steps, edges, block
//! groups, runs, and their run-time records.
//!
//! These types are plain serde structs, not an ORM layer — persistence is
//! delegated to the `RunStore` collaborator (`workflow-checkpoint`). A
//! `ProjectVersion`'s `definition` is the sole source of truth for
//! reconstructing an [`crate::compiler::ExecutionPlan`]; nothing here reaches
//! back into a mutable project table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of a [`Project`]. Only a `Published` version is executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Published,
}

/// A tenant-scoped, versioned DAG definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: ProjectStatus,
    /// Monotonically increasing per-project version number.
    pub version: u32,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub block_groups: Vec<BlockGroup>,
    /// Tenant-scoped constants visible as `$project.<name>` in expressions.
    pub variables: HashMap<String, serde_json::Value>,
    /// Optional project-level error workflow, submitted as a child run on
    /// unrecovered failure.
    pub error_workflow_id: Option<Uuid>,
}

/// An immutable snapshot of a [`Project`] taken at publish time. The
/// `definition` is sufficient, on its own, to reconstruct an execution plan
/// — the compiler never consults the mutable
/// `Project` table once a version is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectVersion {
    pub project_id: Uuid,
    pub tenant_id: Uuid,
    pub version: u32,
    pub definition: ProjectDefinition,
    pub published_at: DateTime<Utc>,
}

/// The stable, persisted JSON shape of a project snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDefinition {
    pub version: u32,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub block_groups: Vec<BlockGroup>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error_workflow_id: Option<Uuid>,
}

/// The step type taxonomy. A capability set, not an inheritance
/// hierarchy — dispatch keys off the tag alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Start,
    Code,
    Llm,
    Agent,
    Tool,
    Condition,
    Switch,
    Map,
    Join,
    Subflow,
    Function,
    Wait,
    Router,
    HumanInLoop,
    SetVariables,
}

/// Trigger kinds a `start` step may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Webhook,
    Slack,
    Discord,
    Email,
    Internal,
    Api,
    AgentChat,
}

/// Which errors a step will retry on, in addition to the engine's default
/// retryable [`crate::error::ErrorKind`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub exponential_backoff: bool,
    #[serde(default)]
    pub retry_on_errors: Vec<crate::error::ErrorKind>,
    /// Adds jitter on top of the exponential backoff for the `RateLimit`
    /// error class; other classes keep exact backoff.
    #[serde(default = "default_true")]
    pub enable_jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            exponential_backoff: false,
            retry_on_errors: Vec::new(),
            enable_jitter: true,
        }
    }
}

/// A step: a single node of the flattened DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub credential_bindings: HashMap<String, Uuid>,
    pub block_group_id: Option<Uuid>,
    /// Only `"body"` in the simplified model.
    pub group_role: Option<String>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    /// Per-step timeout override; defaults to 60s when absent.
    pub timeout_ms: Option<u64>,
}

/// Either endpoint of an [`Edge`] may name a step or a block group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRef {
    Step { id: Uuid },
    Group { id: Uuid },
}

impl NodeRef {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Step { id } | Self::Group { id } => *id,
        }
    }
}

/// An edge connecting two refs, with optional port labels and a gating
/// condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub source_ref: NodeRef,
    pub target_ref: NodeRef,
    #[serde(default = "default_port")]
    pub source_port: String,
    #[serde(default = "default_port")]
    pub target_port: String,
    /// An expression evaluated against the execution context; the edge is
    /// only active if it evaluates truthy.
    pub condition: Option<String>,
}

fn default_port() -> String {
    "output".to_string()
}

/// The four control-flow group types. Fixed set by design —
/// the compiler rejects unknown kinds rather than guessing a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Parallel,
    TryCatch,
    Foreach,
    While,
}

/// A block group: a structural region imposing control-flow semantics over
/// a subset of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroup {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    #[serde(default)]
    pub config: serde_json::Value,
    pub parent_group_id: Option<Uuid>,
    /// JavaScript, executed in the code sandbox: external -> internal.
    pub pre_process: Option<String>,
    /// JavaScript, executed in the code sandbox: internal -> external.
    pub post_process: Option<String>,
}

/// Run lifecycle states. Terminal states never transition out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Who/what submitted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Schedule,
    Webhook,
    Internal,
    AgentChat,
    Resume,
}

/// One execution of a project version, bound to a specific Start step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub project_version: u32,
    pub start_step_id: Uuid,
    pub status: RunStatus,
    /// Monotonic per-project run number, scoped to `triggered_by`.
    pub run_number: u64,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<crate::error::EngineError>,
    pub triggered_by: TriggeredBy,
    pub trigger_metadata: serde_json::Value,
    pub parent_run_id: Option<Uuid>,
    /// Externally supplied key deduplicating trigger submissions within a
    /// window.
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Not part of the state machine proper, but how the scheduler records
    /// a node whose every incoming edge was inactive.
    Skipped,
}

/// One execution of one step within a run attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub step_name: String,
    pub status: StepRunStatus,
    pub attempt: u32,
    /// Global execution order within the run attempt; strictly increasing,
    /// no gaps.
    pub sequence_number: u64,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<crate::error::EngineError>,
    pub duration_ms: Option<u64>,
    /// Debug override of the resolved input.
    pub pinned_input: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One append-only streamed chunk for a step-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub chunk: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub chunk_type: String,
}

/// One execution of a block group for a given iteration. For
/// `parallel`/`try_catch` the iteration is always `0`; `foreach`/`while`
/// produce one `BlockGroupRun` per iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroupRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub block_group_id: Uuid,
    pub iteration: u64,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub status: StepRunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A role in the ReAct-loop conversation an `agent` step drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a step's agent memory, keyed by `(run, step)` and ordered
/// by `sequence_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub sequence_number: u64,
    pub role: MessageRole,
    pub content: serde_json::Value,
    #[serde(default)]
    pub tool_calls: Vec<serde_json::Value>,
    pub tool_call_id: Option<String>,
}

/// Per-call usage returned by a priced executor (LLM adapters), consumed by
/// the usage recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    pub step_run_id: Uuid,
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
}
