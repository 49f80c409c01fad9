//! Executor Host / Queue Consumer (C11): claims `pending` runs
//! from [`RunStore`], drives each through a [`Scheduler`], heartbeats the
//! lease while it runs, and respects a global and a per-tenant concurrency
//! cap. Shutdown is cooperative: once asked to stop,
//! the consumer claims nothing further and lets in-flight runs finish,
//! cancelling them only if they outlast the grace period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use workflow_checkpoint::{ClaimedRun, RunStore};
use workflow_core::model::{RunStatus, TriggeredBy};
use workflow_exec::cancel::CancelToken;
use workflow_exec::context::RunContext;
use workflow_exec::scheduler::Scheduler;

use crate::assembly::{self, HostCollaborators};
use crate::config::HostConfig;
use crate::registry::ProjectRegistry;

/// The executor host: one per process. Holds every collaborator a run
/// needs and the bookkeeping (scheduler cache, per-tenant semaphores,
/// in-flight cancel handles) the consumer loop needs across claims.
pub struct Consumer {
    store: Arc<dyn RunStore>,
    registry: Arc<ProjectRegistry>,
    collaborators: HostCollaborators,
    config: HostConfig,
    global_permits: Arc<Semaphore>,
    tenant_permits: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    schedulers: Mutex<HashMap<(Uuid, Uuid), Arc<Scheduler>>>,
    in_flight: Mutex<HashMap<Uuid, CancelToken>>,
}

impl Consumer {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, registry: Arc<ProjectRegistry>, collaborators: HostCollaborators, config: HostConfig) -> Arc<Self> {
        let global_permits = Arc::new(Semaphore::new(config.worker_concurrency));
        Arc::new(Self {
            store,
            registry,
            collaborators,
            config,
            global_permits,
            tenant_permits: Mutex::new(HashMap::new()),
            schedulers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Cooperative cancellation for a specific run, independent of host
    /// shutdown ( `Cancel(run_id)`). A no-op if the run isn't
    /// currently held by this host.
    pub fn cancel_run(&self, run_id: Uuid) {
        if let Some(token) = self.in_flight.lock().unwrap().get(&run_id) {
            token.cancel();
        }
    }

    fn tenant_permit(&self, tenant_id: Uuid) -> Arc<Semaphore> {
        Arc::clone(
            self.tenant_permits
                .lock()
                .unwrap()
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_tenant_concurrency))),
        )
    }

    fn scheduler_for(&self, tenant_id: Uuid, project_id: Uuid) -> Option<Arc<Scheduler>> {
        let key = (tenant_id, project_id);
        if let Some(existing) = self.schedulers.lock().unwrap().get(&key) {
            return Some(Arc::clone(existing));
        }
        let plan = self.registry.plan(tenant_id, project_id)?;
        let scheduler = assembly::build_scheduler(plan, &self.collaborators);
        self.schedulers.lock().unwrap().insert(key, Arc::clone(&scheduler));
        Some(scheduler)
    }

    /// Runs the claim/execute loop until `shutdown` is cancelled, then
    /// drains in-flight work: waits up to `shutdown_grace_secs` for it to
    /// finish naturally before cooperatively cancelling what remains.
    pub async fn run(self: Arc<Self>, shutdown: CancelToken) {
        let mut tasks = JoinSet::new();
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let claimed = match self.store.claim_pending(self.config.lease_duration_secs).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => continue,
                        _ = shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "claim_pending failed");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                    continue;
                }
            };

            let global = Arc::clone(&self.global_permits);
            let tenant = self.tenant_permit(claimed.run.tenant_id);
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let _global_permit = global.acquire_owned().await.expect("global semaphore closed");
                let _tenant_permit = tenant.acquire_owned().await.expect("tenant semaphore closed");
                this.execute_claimed(claimed).await;
            });
        }

        tracing::info!(in_flight = tasks.len(), "shutdown requested, draining in-flight runs");
        let grace = tokio::time::sleep(Duration::from_secs(self.config.shutdown_grace_secs));
        tokio::pin!(grace);
        loop {
            tokio::select! {
                next = tasks.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
                () = &mut grace => {
                    tracing::warn!("shutdown grace period elapsed, cancelling remaining runs");
                    for token in self.in_flight.lock().unwrap().values() {
                        token.cancel();
                    }
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
        tracing::info!("executor host stopped");
    }

    /// Dispatches a `triggered_by: Resume` claim to [`Scheduler::resume`] or
    /// [`Scheduler::execute_single_step`] per [`Ingress::submit_resume`]'s
    /// `trigger_metadata` shape: `source_run_id` (the run whose history to
    /// replay), `input_override` (optional), and `single_step` (replay one
    /// node and stop vs. continue downstream). `claimed.run.start_step_id`
    /// doubles as the resume target, same as `submit_resume` stored it.
    async fn execute_resume(
        &self,
        scheduler: &Scheduler,
        claimed: &ClaimedRun,
        project_variables: HashMap<String, serde_json::Value>,
        cancel: &CancelToken,
    ) -> std::result::Result<workflow_exec::scheduler::RunOutcome, String> {
        let metadata = &claimed.run.trigger_metadata;
        let source_run_id = metadata
            .get("source_run_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| "trigger_metadata missing source_run_id".to_string())?;
        let input_override = metadata.get("input_override").cloned().filter(|v| !v.is_null());
        let single_step = metadata.get("single_step").and_then(|v| v.as_bool()).unwrap_or(false);
        let target = claimed.run.start_step_id;

        let outcome = if single_step {
            scheduler
                .execute_single_step(
                    claimed.run.id,
                    claimed.run.tenant_id,
                    source_run_id,
                    target,
                    input_override,
                    project_variables,
                    HashMap::new(),
                    HashMap::new(),
                    cancel,
                )
                .await
        } else {
            scheduler
                .resume(
                    claimed.run.id,
                    claimed.run.tenant_id,
                    source_run_id,
                    target,
                    input_override,
                    project_variables,
                    HashMap::new(),
                    HashMap::new(),
                    cancel,
                )
                .await
        };
        outcome.map_err(|e| e.to_string())
    }

    async fn execute_claimed(&self, claimed: ClaimedRun) {
        let run_id = claimed.run.id;
        let tenant_id = claimed.run.tenant_id;
        let project_id = claimed.run.project_id;

        let Some(scheduler) = self.scheduler_for(tenant_id, project_id) else {
            tracing::error!(%run_id, %project_id, "no published plan for claimed run; abandoning to lease expiry");
            return;
        };
        let project_variables = self
            .registry
            .definition(tenant_id, project_id)
            .map(|v| v.definition.variables)
            .unwrap_or_default();

        let cancel = CancelToken::new();
        self.in_flight.lock().unwrap().insert(run_id, cancel.clone());

        let heartbeat_cancel = cancel.clone();
        let heartbeat_store = Arc::clone(&self.store);
        let heartbeat_lease = claimed.lease;
        let heartbeat_interval = self.config.heartbeat_interval_secs;
        let heartbeat_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(heartbeat_interval)) => {
                        if let Err(e) = heartbeat_store.heartbeat(heartbeat_lease, heartbeat_interval * 3).await {
                            tracing::warn!(%run_id, error = %e, "heartbeat failed");
                        }
                    }
                    _ = heartbeat_cancel.cancelled() => break,
                }
            }
        });

        let outcome = if claimed.run.triggered_by == TriggeredBy::Resume {
            match self.execute_resume(&scheduler, &claimed, project_variables, &cancel).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(%run_id, %error, "resume claim had malformed trigger_metadata or failed to load its source run");
                    cancel.cancel();
                    let _ = heartbeat_handle.await;
                    self.in_flight.lock().unwrap().remove(&run_id);
                    return;
                }
            }
        } else {
            let ctx = RunContext::new(
                run_id,
                tenant_id,
                claimed.run.start_step_id,
                claimed.run.input.clone(),
                project_variables,
                HashMap::new(),
                HashMap::new(),
            );
            scheduler.run(ctx, &cancel).await
        };

        cancel.cancel();
        let _ = heartbeat_handle.await;
        self.in_flight.lock().unwrap().remove(&run_id);

        match outcome.status {
            RunStatus::Completed => tracing::info!(%run_id, "run completed"),
            RunStatus::Failed => tracing::warn!(%run_id, error = ?outcome.error, "run failed"),
            RunStatus::Cancelled => tracing::info!(%run_id, "run cancelled"),
            RunStatus::Pending | RunStatus::Running => {
                tracing::error!(%run_id, "scheduler returned a non-terminal status")
            }
        }
    }
}
