//! The `RunStore` contract: the only shared mutable state in
//! the engine. Every scheduler commit is atomic with its persistence write;
//! all writes carry optimistic concurrency on `(run_id, version)`.
//!
//! This crate ships one reference implementation, [`crate::memory::InMemoryRunStore`],
//! suitable for tests and a single-process host. A production deployment
//! swaps in a relational/KV-backed implementation of the same trait — the
//! scheduler (`workflow-exec`) is written against the trait alone, the same
//! way `langgraph_checkpoint::traits::CheckpointSaver` decouples the pregel
//! executor from any particular storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;
use workflow_core::model::{
    AgentMessage, BlockGroupRun, ProjectVersion, Run, RunStatus, StepRun, StreamChunk, UsageRecord,
};

use crate::error::Result;

/// The delta a single scheduler commit applies to a run's accumulated
/// execution context.
#[derive(Debug, Clone, Default)]
pub struct RunContextDelta {
    /// `(step_name, output)` recorded under `$steps.<name>.output` once the
    /// commit lands.
    pub step_output: Option<(String, Value)>,
    /// Patch applied to `$vars`.
    pub vars_patch: HashMap<String, Value>,
    /// A run-level status transition to apply atomically with the step
    /// commit (e.g. the step that completed the run).
    pub run_status: Option<RunStatus>,
    pub run_output: Option<Value>,
    pub run_error: Option<workflow_core::error::EngineError>,
}

/// A lease handed out by [`RunStore::claim_pending`]. Re-presented to
/// [`RunStore::heartbeat`] to extend it; expiry returns the run to
/// `pending` for another worker to claim (at-least-once semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken {
    pub run_id: Uuid,
    pub epoch: u64,
}

/// Snapshot of a claimed run plus the lease backing it.
#[derive(Debug, Clone)]
pub struct ClaimedRun {
    pub run: Run,
    pub lease: LeaseToken,
    pub lease_expires_at: DateTime<Utc>,
}

/// The persistence contract every component above it is written against.
/// All operations are tenant-scoped; a read or write whose
/// target does not belong to `tenant_id` fails with
/// [`crate::error::StoreError::CrossTenant`] rather than leaking existence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new project version snapshot, the unit the compiler reads
    /// from.
    async fn put_project_version(&self, version: ProjectVersion) -> Result<()>;

    async fn get_project_version(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        version: u32,
    ) -> Result<ProjectVersion>;

    /// `CreateRun(Run) -> void`, atomic with idempotency-key dedup.
    async fn create_run(&self, run: Run) -> Result<()>;

    /// Look up a run by id, tenant-scoped.
    async fn get_run(&self, tenant_id: Uuid, run_id: Uuid) -> Result<Run>;

    /// `ClaimPending() -> Run?`, leased.
    async fn claim_pending(&self, lease_duration_secs: u64) -> Result<Option<ClaimedRun>>;

    /// `Heartbeat(run_id) -> void`: extend a held lease.
    async fn heartbeat(&self, lease: LeaseToken, lease_duration_secs: u64) -> Result<()>;

    /// `CommitStepRun(step_run, run_ctx_delta) -> void`, a single
    /// transaction.
    async fn commit_step_run(&self, step_run: StepRun, ctx_delta: RunContextDelta) -> Result<()>;

    /// `AppendStreamChunk(step_run_id, chunk) -> void`.
    async fn append_stream_chunk(&self, step_run_id: Uuid, chunk: StreamChunk) -> Result<()>;

    /// Read back the accumulated stream for a step-run (consumer side of
    /// "Output capture").
    async fn read_stream_chunks(&self, step_run_id: Uuid) -> Result<Vec<StreamChunk>>;

    /// `LoadForResume(run_id) -> (ProjectVersion, Run, [StepRun])`.
    async fn load_for_resume(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
    ) -> Result<(ProjectVersion, Run, Vec<StepRun>)>;

    /// `RecordUsage(UsageRecord) -> void`.
    async fn record_usage(&self, usage: UsageRecord) -> Result<()>;

    /// Sum of cost already recorded against the applicable budget scope
    /// within its current period, used by the pre-dispatch budget check.
    async fn accumulated_cost_usd(&self, tenant_id: Uuid, budget_key: &str) -> Result<f64>;

    /// Increment a budget key's current-period cost accumulator. Separate from
    /// [`Self::record_usage`], which only persists the raw call: a budget
    /// key may aggregate several distinct `(provider, model)` calls.
    async fn accumulate_cost(&self, tenant_id: Uuid, budget_key: &str, cost_usd: f64) -> Result<()>;

    /// Append one message to a step's agent memory.
    async fn append_agent_message(&self, message: AgentMessage) -> Result<()>;

    /// Read a step's full agent memory in sequence order.
    async fn read_agent_memory(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
        step_id: Uuid,
    ) -> Result<Vec<AgentMessage>>;

    /// Persist a block-group-run snapshot.
    async fn put_block_group_run(&self, group_run: BlockGroupRun) -> Result<()>;

    async fn list_block_group_runs(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
        block_group_id: Uuid,
    ) -> Result<Vec<BlockGroupRun>>;
}
