//! An in-memory [`RunStore`] implementation: the reference backend used by
//! tests and by `workflow-host` when no external relational/KV store is
//! configured. Mirrors the role of `langgraph_checkpoint::memory`'s
//! `MemorySaver` — correct and fully contract-compliant, not durable across
//! process restarts.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;
use workflow_core::model::{
    AgentMessage, BlockGroupRun, ProjectVersion, Run, RunStatus, StepRun, StreamChunk, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::store::{ClaimedRun, LeaseToken, RunContextDelta, RunStore};

struct RunRecord {
    run: Run,
    steps_ctx: HashMap<String, serde_json::Value>,
    vars_ctx: HashMap<String, serde_json::Value>,
    lease_epoch: u64,
    lease_expires_at: Option<chrono::DateTime<Utc>>,
    sequence_counter: u64,
}

#[derive(Default)]
struct Inner {
    project_versions: HashMap<(Uuid, u32), ProjectVersion>,
    runs: HashMap<Uuid, RunRecord>,
    step_runs: HashMap<Uuid, Vec<StepRun>>,
    stream_chunks: HashMap<Uuid, Vec<StreamChunk>>,
    usage: Vec<UsageRecord>,
    cost_by_key: HashMap<(Uuid, String), f64>,
    agent_memory: HashMap<(Uuid, Uuid), Vec<AgentMessage>>,
    block_group_runs: HashMap<(Uuid, Uuid), Vec<BlockGroupRun>>,
    idempotency_index: HashMap<String, Uuid>,
    pending_queue: VecDeque<Uuid>,
}

/// Reference, in-process [`RunStore`].
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
    lease_epoch_counter: AtomicU64,
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            lease_epoch_counter: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn put_project_version(&self, version: ProjectVersion) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .project_versions
            .insert((version.project_id, version.version), version);
        Ok(())
    }

    async fn get_project_version(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        version: u32,
    ) -> Result<ProjectVersion> {
        let inner = self.inner.read().await;
        let found = inner
            .project_versions
            .get(&(project_id, version))
            .ok_or(StoreError::ProjectVersionNotFound { project_id, version })?;
        if found.tenant_id != tenant_id {
            return Err(StoreError::CrossTenant);
        }
        Ok(found.clone())
    }

    async fn create_run(&self, run: Run) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(key) = run.idempotency_key.clone() {
            if let Some(existing) = inner.idempotency_index.get(&key) {
                if *existing != run.id {
                    return Err(StoreError::DuplicateIdempotencyKey(key));
                }
            } else {
                inner.idempotency_index.insert(key, run.id);
            }
        }
        inner.pending_queue.push_back(run.id);
        inner.runs.insert(
            run.id,
            RunRecord {
                run,
                steps_ctx: HashMap::new(),
                vars_ctx: HashMap::new(),
                lease_epoch: 0,
                lease_expires_at: None,
                sequence_counter: 0,
            },
        );
        Ok(())
    }

    async fn get_run(&self, tenant_id: Uuid, run_id: Uuid) -> Result<Run> {
        let inner = self.inner.read().await;
        let record = inner.runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if record.run.tenant_id != tenant_id {
            return Err(StoreError::CrossTenant);
        }
        Ok(record.run.clone())
    }

    async fn claim_pending(&self, lease_duration_secs: u64) -> Result<Option<ClaimedRun>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        // Recycle expired leases back to the front of the queue so a dead
        // worker's run is retried.
        let expired: Vec<Uuid> = inner
            .runs
            .iter()
            .filter(|(_, r)| {
                r.run.status == RunStatus::Running
                    && r.lease_expires_at.is_some_and(|exp| exp <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            inner.pending_queue.push_back(id);
            if let Some(r) = inner.runs.get_mut(&id) {
                r.run.status = RunStatus::Pending;
            }
        }

        while let Some(run_id) = inner.pending_queue.pop_front() {
            let epoch = self.lease_epoch_counter.fetch_add(1, Ordering::SeqCst);
            let expires_at = now + chrono::Duration::seconds(lease_duration_secs as i64);
            if let Some(record) = inner.runs.get_mut(&run_id) {
                if record.run.status != RunStatus::Pending {
                    // Already claimed/terminal since it was enqueued; skip.
                    continue;
                }
                record.run.status = RunStatus::Running;
                record.run.updated_at = now;
                record.lease_epoch = epoch;
                record.lease_expires_at = Some(expires_at);
                return Ok(Some(ClaimedRun {
                    run: record.run.clone(),
                    lease: LeaseToken { run_id, epoch },
                    lease_expires_at: expires_at,
                }));
            }
        }
        Ok(None)
    }

    async fn heartbeat(&self, lease: LeaseToken, lease_duration_secs: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .runs
            .get_mut(&lease.run_id)
            .ok_or(StoreError::RunNotFound(lease.run_id))?;
        if record.lease_epoch != lease.epoch {
            return Err(StoreError::LeaseNotHeld(lease.run_id));
        }
        record.lease_expires_at =
            Some(Utc::now() + chrono::Duration::seconds(lease_duration_secs as i64));
        Ok(())
    }

    async fn commit_step_run(&self, mut step_run: StepRun, ctx_delta: RunContextDelta) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run_id = step_run.run_id;
        let record = inner.runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;

        record.sequence_counter += 1;
        step_run.sequence_number = record.sequence_counter;

        if let Some((name, output)) = ctx_delta.step_output {
            record
                .steps_ctx
                .insert(name, serde_json::json!({ "output": output }));
        }
        for (k, v) in ctx_delta.vars_patch {
            record.vars_ctx.insert(k, v);
        }
        if let Some(status) = ctx_delta.run_status {
            record.run.status = status;
            record.run.updated_at = Utc::now();
        }
        if let Some(output) = ctx_delta.run_output {
            record.run.output = Some(output);
        }
        if let Some(error) = ctx_delta.run_error {
            record.run.error = Some(error);
        }

        inner.step_runs.entry(run_id).or_default().push(step_run);
        Ok(())
    }

    async fn append_stream_chunk(&self, step_run_id: Uuid, chunk: StreamChunk) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.stream_chunks.entry(step_run_id).or_default().push(chunk);
        Ok(())
    }

    async fn read_stream_chunks(&self, step_run_id: Uuid) -> Result<Vec<StreamChunk>> {
        let inner = self.inner.read().await;
        Ok(inner.stream_chunks.get(&step_run_id).cloned().unwrap_or_default())
    }

    async fn load_for_resume(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
    ) -> Result<(ProjectVersion, Run, Vec<StepRun>)> {
        let inner = self.inner.read().await;
        let record = inner.runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if record.run.tenant_id != tenant_id {
            return Err(StoreError::CrossTenant);
        }
        let version = inner
            .project_versions
            .get(&(record.run.project_id, record.run.project_version))
            .ok_or(StoreError::ProjectVersionNotFound {
                project_id: record.run.project_id,
                version: record.run.project_version,
            })?
            .clone();
        let step_runs = inner.step_runs.get(&run_id).cloned().unwrap_or_default();
        Ok((version, record.run.clone(), step_runs))
    }

    async fn record_usage(&self, usage: UsageRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.usage.push(usage);
        Ok(())
    }

    async fn accumulated_cost_usd(&self, tenant_id: Uuid, budget_key: &str) -> Result<f64> {
        let inner = self.inner.read().await;
        Ok(inner
            .cost_by_key
            .get(&(tenant_id, budget_key.to_string()))
            .copied()
            .unwrap_or(0.0))
    }

    async fn accumulate_cost(&self, tenant_id: Uuid, budget_key: &str, cost_usd: f64) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner
            .cost_by_key
            .entry((tenant_id, budget_key.to_string()))
            .or_insert(0.0) += cost_usd;
        Ok(())
    }

    async fn append_agent_message(&self, message: AgentMessage) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .agent_memory
            .entry((message.run_id, message.step_id))
            .or_default()
            .push(message);
        Ok(())
    }

    async fn read_agent_memory(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
        step_id: Uuid,
    ) -> Result<Vec<AgentMessage>> {
        let inner = self.inner.read().await;
        let record = inner.runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if record.run.tenant_id != tenant_id {
            return Err(StoreError::CrossTenant);
        }
        Ok(inner
            .agent_memory
            .get(&(run_id, step_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn put_block_group_run(&self, group_run: BlockGroupRun) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .block_group_runs
            .entry((group_run.run_id, group_run.block_group_id))
            .or_default()
            .push(group_run);
        Ok(())
    }

    async fn list_block_group_runs(
        &self,
        tenant_id: Uuid,
        run_id: Uuid,
        block_group_id: Uuid,
    ) -> Result<Vec<BlockGroupRun>> {
        let inner = self.inner.read().await;
        let record = inner.runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if record.run.tenant_id != tenant_id {
            return Err(StoreError::CrossTenant);
        }
        Ok(inner
            .block_group_runs
            .get(&(run_id, block_group_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_core::model::{RunStatus, TriggeredBy};

    fn sample_run(tenant_id: Uuid) -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            tenant_id,
            project_id: Uuid::new_v4(),
            project_version: 1,
            start_step_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            run_number: 1,
            input: serde_json::json!({}),
            output: None,
            error: None,
            triggered_by: TriggeredBy::Manual,
            trigger_metadata: serde_json::json!({}),
            parent_run_id: None,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn claim_then_heartbeat_then_requires_matching_epoch() {
        let store = InMemoryRunStore::new();
        let tenant = Uuid::new_v4();
        let run = sample_run(tenant);
        store.create_run(run.clone()).await.unwrap();

        let claimed = store.claim_pending(30).await.unwrap().unwrap();
        assert_eq!(claimed.run.id, run.id);
        store.heartbeat(claimed.lease, 30).await.unwrap();

        let stale = LeaseToken {
            run_id: run.id,
            epoch: claimed.lease.epoch + 1,
        };
        assert!(store.heartbeat(stale, 30).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryRunStore::new();
        let tenant = Uuid::new_v4();
        let mut run_a = sample_run(tenant);
        run_a.idempotency_key = Some("wh-1".to_string());
        let mut run_b = sample_run(tenant);
        run_b.idempotency_key = Some("wh-1".to_string());

        store.create_run(run_a).await.unwrap();
        let err = store.create_run(run_b).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey(_)));
    }

    #[tokio::test]
    async fn cross_tenant_read_is_forbidden() {
        let store = InMemoryRunStore::new();
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();
        let run = sample_run(tenant);
        store.create_run(run.clone()).await.unwrap();

        let err = store.get_run(other_tenant, run.id).await.unwrap_err();
        assert_eq!(err, StoreError::CrossTenant);
    }

    #[tokio::test]
    async fn sequence_numbers_are_gapless_and_increasing() {
        let store = InMemoryRunStore::new();
        let tenant = Uuid::new_v4();
        let run = sample_run(tenant);
        store.create_run(run.clone()).await.unwrap();

        for i in 0..3u32 {
            let step_run = StepRun {
                id: Uuid::new_v4(),
                run_id: run.id,
                step_id: Uuid::new_v4(),
                step_name: format!("step{i}"),
                status: workflow_core::model::StepRunStatus::Succeeded,
                attempt: 1,
                sequence_number: 0,
                input: serde_json::json!({}),
                output: Some(serde_json::json!({})),
                error: None,
                duration_ms: Some(1),
                pinned_input: None,
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
            };
            store
                .commit_step_run(step_run, RunContextDelta::default())
                .await
                .unwrap();
        }

        let (_, _, step_runs) = store.load_for_resume(tenant, run.id).await.unwrap();
        let sequences: Vec<u64> = step_runs.iter().map(|s| s.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}
