//! Run Scheduler (C7): the ready-set loop. Drives a compiled
//! plan node by node — ungrouped steps through the state machine, block
//! groups through their interpreter — resolving each node's input from its
//! active incoming edges and activating downstream edges on completion.
//! The scheduler is the sole mutator of [`RunContext`] ; everything else only ever sees a snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::compiler::ExecutionPlan;
use workflow_core::error::{EngineError, Result};
use workflow_core::expr::eval_condition;
use workflow_core::model::{NodeRef, RunStatus, StepRun, StepRunStatus};
use workflow_checkpoint::{RunContextDelta, RunStore};

use crate::cancel::CancelToken;
use crate::context::RunContext;
use crate::credentials::{CredentialResolver, CredentialSource, CryptoCollaborator};
use crate::dispatch::control::branch_of;
use crate::dispatch::llm_exec::SiblingStepRunner;
use crate::dispatch::SubflowRunner;
use crate::groups::{self, GroupOutcome, StepRunner};
use crate::state_machine::{StepMachine, StepOutcome};
use crate::usage::{PriceTable, RunSummary};

/// Loads the compiled plan for a project version, the scheduler's only
/// dependency for running a `subflow` step — kept as a trait so
/// `workflow-exec` never depends on how project versions are fetched.
#[async_trait::async_trait]
pub trait PlanLoader: Send + Sync {
    async fn load_plan(&self, tenant_id: Uuid, project_id: Uuid) -> Result<Arc<ExecutionPlan>>;
}

/// What one edge into a node contributed once its source completed:
/// whether that path was active, and the value it carried if so.
#[derive(Debug, Clone)]
struct Inbound {
    source_name: String,
    active: bool,
    value: serde_json::Value,
}

/// Terminal result of driving one run to completion.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<EngineError>,
    pub summary: RunSummary,
}

/// Drives the ready-set loop for one run. One instance is
/// shared across all runs a host is serving; it carries no per-run state
/// itself beyond its collaborators.
pub struct Scheduler {
    plan: Arc<ExecutionPlan>,
    machine: Arc<StepMachine>,
    store: Arc<dyn RunStore>,
    credential_source: Arc<dyn CredentialSource>,
    crypto: Arc<dyn CryptoCollaborator>,
    plans: Arc<dyn PlanLoader>,
    /// The same price table the [`StepMachine`]'s [`crate::usage::UsageRecorder`]
    /// bills against, used here only to total [`RunSummary::total_cost_usd`]
    /// from the raw [`workflow_core::model::UsageRecord`]s a run produced.
    prices: Arc<dyn PriceTable>,
    /// Step names in this plan, resolved once, for keying join inputs and
    /// group outputs by name rather than id.
    names: HashMap<Uuid, String>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        plan: Arc<ExecutionPlan>,
        machine: Arc<StepMachine>,
        store: Arc<dyn RunStore>,
        credential_source: Arc<dyn CredentialSource>,
        crypto: Arc<dyn CryptoCollaborator>,
        plans: Arc<dyn PlanLoader>,
        prices: Arc<dyn PriceTable>,
    ) -> Self {
        let names = plan.nodes.iter().map(|(id, step)| (*id, step.name.clone())).collect();
        Self {
            plan,
            machine,
            store,
            credential_source,
            crypto,
            plans,
            prices,
            names,
        }
    }

    /// A node is scheduled at the top level iff it is an un-nested group's
    /// virtual node, or a step with no containing group. Body steps — and
    /// nested groups — are never popped from the top-level ready set: the
    /// containing group's own node delegates to its interpreter, which
    /// drives them internally via [`StepRunner`] and recurses into a
    /// further interpreter for any nested group it encounters.
    fn is_top_level(&self, node: &NodeRef) -> bool {
        match node {
            NodeRef::Group { id } => self.plan.group(*id).is_none_or(|g| g.parent_group_id.is_none()),
            NodeRef::Step { id } => self.plan.immediate_group_of(*id).is_none(),
        }
    }

    /// Runs `ctx.run_id` to a terminal [`RunOutcome`], starting from
    /// `ctx.start_step_id`.
    pub async fn run(&self, ctx: RunContext, cancel: &CancelToken) -> RunOutcome {
        let entry = NodeRef::Step { id: ctx.start_step_id };
        let entry_input = ctx.public_snapshot().input;
        self.run_from(ctx, entry, entry_input, &HashMap::new(), cancel).await
    }

    /// Resumes a terminal run from `target_step_id`: reloads `source_run_id`'s
    /// `ProjectVersion`/history via [`RunStore::load_for_resume`], replays
    /// every succeeded step's recorded output into a fresh `ctx`, and
    /// re-enters the ready set at `target_step_id` rather than the run's
    /// original entry. Everything downstream of the target is re-executed;
    /// upstream siblings are untouched. `input_override` fixes up the
    /// target's resolved input (the usual reason to resume a failed run);
    /// absent an override, the target's previously recorded input is reused.
    ///
    /// `ctx_run_id` is the run identity the resumed execution's own step-runs
    /// and terminal transition commit under — equal to `source_run_id` for an
    /// in-place resume, or a freshly minted id when the caller models each
    /// resume attempt as its own [`workflow_core::model::Run`] row linked back
    /// via `parent_run_id` (the host's ingress path does the latter).
    #[allow(clippy::too_many_arguments)]
    pub async fn resume(
        &self,
        ctx_run_id: Uuid,
        tenant_id: Uuid,
        source_run_id: Uuid,
        target_step_id: Uuid,
        input_override: Option<serde_json::Value>,
        project_variables: HashMap<String, serde_json::Value>,
        org_variables: HashMap<String, serde_json::Value>,
        personal_variables: HashMap<String, serde_json::Value>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let (_version, run, history) = self
            .store
            .load_for_resume(tenant_id, source_run_id)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to load run {source_run_id} for resume: {e}")))?;
        let mut ctx = RunContext::new(ctx_run_id, tenant_id, target_step_id, run.input.clone(), project_variables, org_variables, personal_variables);
        replay_succeeded_outputs(&mut ctx, &history);
        let entry_input = resolve_resume_input(&history, target_step_id, input_override);
        let base_attempts = base_attempts_by_step(&history);
        let entry = NodeRef::Step { id: target_step_id };
        Ok(self.run_from(ctx, entry, entry_input, &base_attempts, cancel).await)
    }

    /// Re-executes a single step of a terminal run and returns to the run's
    /// prior terminal state rather than continuing downstream — the
    /// debug/inspection counterpart to [`Self::resume`]. Still commits a new
    /// [`StepRun`] attempt through the same [`StepMachine`] path (and, for a
    /// nested group id, the same group-dispatch path), so it is durable and
    /// inspectable the same way a normal step execution is. Same `ctx_run_id`
    /// vs. `source_run_id` split as [`Self::resume`].
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_single_step(
        &self,
        ctx_run_id: Uuid,
        tenant_id: Uuid,
        source_run_id: Uuid,
        target: Uuid,
        input_override: Option<serde_json::Value>,
        project_variables: HashMap<String, serde_json::Value>,
        org_variables: HashMap<String, serde_json::Value>,
        personal_variables: HashMap<String, serde_json::Value>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let (_version, run, history) = self
            .store
            .load_for_resume(tenant_id, source_run_id)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to load run {source_run_id} for resume: {e}")))?;
        let mut ctx = RunContext::new(ctx_run_id, tenant_id, target, run.input.clone(), project_variables, org_variables, personal_variables);
        replay_succeeded_outputs(&mut ctx, &history);
        let resolved_input = resolve_resume_input(&history, target, input_override);
        let node = if self.plan.group(target).is_some() {
            NodeRef::Group { id: target }
        } else {
            NodeRef::Step { id: target }
        };

        let runner = self.as_step_runner();
        let outcome = runner.run_step(node, resolved_input, &mut ctx, cancel).await;
        let summary = RunSummary::from_step_runs(&[], 0.0);

        let result = match outcome.status {
            StepRunStatus::Succeeded => RunOutcome {
                status: run.status,
                output: run.output.clone(),
                error: run.error.clone(),
                summary,
            },
            StepRunStatus::Cancelled => RunOutcome {
                status: RunStatus::Cancelled,
                output: None,
                error: outcome.error,
                summary,
            },
            _ => RunOutcome {
                status: RunStatus::Failed,
                output: None,
                error: outcome.error,
                summary,
            },
        };
        self.finalize(ctx_run_id, result.status, result.output.clone(), result.error.clone(), 0).await;
        Ok(result)
    }

    /// The shared ready-set loop behind [`Self::run`] and [`Self::resume`]:
    /// drives `ctx` to a terminal [`RunOutcome`] from `entry`, using
    /// `entry_input` as that node's resolved input (the run's own input for
    /// a fresh run, a replayed/overridden value for a resume) and
    /// `base_attempts` to offset each step's committed attempt number past
    /// whatever it already accumulated in an earlier pass over this run.
    async fn run_from(
        &self,
        mut ctx: RunContext,
        entry: NodeRef,
        entry_input: serde_json::Value,
        base_attempts: &HashMap<Uuid, u32>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let mut pending: HashMap<NodeRef, usize> = self
            .plan
            .in_degree
            .iter()
            .filter(|(n, _)| self.is_top_level(n))
            .map(|(n, c)| (n.clone(), *c))
            .collect();
        let mut inbound: HashMap<NodeRef, Vec<Inbound>> = HashMap::new();
        let mut ready: VecDeque<NodeRef> = VecDeque::new();
        let mut sequence_number: u64 = 0;
        let mut committed_step_runs: Vec<StepRun> = Vec::new();
        let mut total_cost_usd = 0.0;

        ready.push_back(entry.clone());

        let mut terminal: Option<(RunStatus, Option<serde_json::Value>, Option<EngineError>)> = None;
        // The output of the most recently completed sink-ward node becomes
        // the run's output if the loop drains without an explicit
        // terminal transition.
        let mut last_output: Option<serde_json::Value> = None;

        while let Some(node) = ready.pop_front() {
            if cancel.is_cancelled() {
                terminal = Some((RunStatus::Cancelled, None, None));
                break;
            }

            let is_entry = node == entry;
            let entries = inbound.remove(&node).unwrap_or_default();
            let any_active = is_entry || entries.iter().any(|e| e.active);

            if !any_active {
                self.activate_successors(&node, None, &mut pending, &mut ready, &mut inbound, &ctx);
                continue;
            }

            let resolved_input = self.resolve_input(&node, is_entry, &entry_input, &entries);

            match node {
                NodeRef::Step { id } => {
                    let step = match self.plan.step(id) {
                        Some(s) => s.clone(),
                        None => {
                            terminal = Some((
                                RunStatus::Failed,
                                None,
                                Some(EngineError::permanent(format!("unknown step {id} in plan"))),
                            ));
                            break;
                        }
                    };
                    let credentials = match CredentialResolver::new(self.credential_source.as_ref(), self.crypto.as_ref())
                        .resolve(ctx.tenant_id, &step.credential_bindings)
                    {
                        Ok(c) => c,
                        Err(error) => {
                            if let Some(outcome) = self.route_failure(&step.group_chain, error.clone()) {
                                terminal = Some(outcome);
                                break;
                            }
                            continue;
                        }
                    };

                    sequence_number += 1;
                    let eval_ctx = ctx.snapshot(
                        credentials
                            .iter()
                            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.expose().to_string())))
                            .collect(),
                        workflow_core::expr::EvalCapabilities::with_secrets(),
                    );
                    let base_attempt = base_attempts.get(&id).copied().unwrap_or(0);
                    let outcome: StepOutcome = self
                        .machine
                        .run(
                            ctx.run_id,
                            ctx.tenant_id,
                            sequence_number,
                            &step,
                            resolved_input,
                            &eval_ctx,
                            &credentials,
                            cancel,
                            base_attempt,
                        )
                        .await;

                    for usage in &outcome.usage {
                        let (price_in, price_out) = self.prices.price_per_1k(&usage.provider, &usage.model);
                        total_cost_usd += usage.input_tokens as f64 / 1000.0 * price_in
                            + usage.output_tokens as f64 / 1000.0 * price_out;
                    }

                    match outcome.status {
                        StepRunStatus::Succeeded => {
                            let output = outcome.output.clone().unwrap_or(serde_json::Value::Null);
                            ctx.record_step_output(step.name.clone(), output.clone());
                            committed_step_runs.push(synthetic_record(ctx.run_id, id, &step.name, StepRunStatus::Succeeded, outcome.attempts, sequence_number));
                            self.activate_successors(&node, Some(&output), &mut pending, &mut ready, &mut inbound, &ctx);
                            last_output = Some(output);
                        }
                        StepRunStatus::Cancelled => {
                            terminal = Some((RunStatus::Cancelled, None, outcome.error));
                            break;
                        }
                        _ => {
                            committed_step_runs.push(synthetic_record(ctx.run_id, id, &step.name, StepRunStatus::Failed, outcome.attempts, sequence_number));
                            let error = outcome.error.unwrap_or_else(|| EngineError::permanent("step failed with no error detail"));
                            if let Some(result) = self.route_failure(&step.group_chain, error) {
                                terminal = Some(result);
                                break;
                            }
                        }
                    }
                }
                NodeRef::Group { id } => {
                    let group = match self.plan.group(id) {
                        Some(g) => g.clone(),
                        None => {
                            terminal = Some((
                                RunStatus::Failed,
                                None,
                                Some(EngineError::permanent(format!("unknown group {id} in plan"))),
                            ));
                            break;
                        }
                    };
                    let outcome = self.run_group(&group, resolved_input, &mut ctx, cancel).await;
                    match outcome.status {
                        StepRunStatus::Succeeded => {
                            ctx.record_step_output(groups::group_label(id), outcome.output.clone());
                            self.activate_successors(&node, Some(&outcome.output), &mut pending, &mut ready, &mut inbound, &ctx);
                            last_output = Some(outcome.output);
                        }
                        StepRunStatus::Cancelled => {
                            terminal = Some((RunStatus::Cancelled, None, outcome.error));
                            break;
                        }
                        _ => {
                            let error = outcome.error.unwrap_or_else(|| EngineError::permanent("group failed with no error detail"));
                            let chain = parent_chain(&self.plan, group.parent_group_id);
                            if let Some(result) = self.route_failure(&chain, error) {
                                terminal = Some(result);
                                break;
                            }
                        }
                    }
                }
            }
        }

        let (status, output, error) = terminal.unwrap_or((RunStatus::Completed, last_output, None));
        let summary = RunSummary::from_step_runs(&committed_step_runs, total_cost_usd);
        summary.log(ctx.run_id);
        self.finalize(ctx.run_id, status, output.clone(), error.clone(), sequence_number).await;

        RunOutcome { status, output, error, summary }
    }

    /// Builds the resolved input for a node from its inbound edges: a
    /// `join` step gathers every inbound entry (active or not, null when
    /// inactive — `join` doc); any other node takes the first
    /// active entry's value, or `entry_input` at the entry node (the run's
    /// own input for a fresh run, a replayed/overridden value on resume).
    fn resolve_input(&self, node: &NodeRef, is_entry: bool, entry_input: &serde_json::Value, entries: &[Inbound]) -> serde_json::Value {
        if is_entry {
            return entry_input.clone();
        }
        let is_join = matches!(node, NodeRef::Step { id } if self.plan.step(*id).map(|s| s.step_type) == Some(workflow_core::model::StepType::Join));
        if is_join {
            let mut map = serde_json::Map::with_capacity(entries.len());
            for entry in entries {
                map.insert(entry.source_name.clone(), if entry.active { entry.value.clone() } else { serde_json::Value::Null });
            }
            return serde_json::Value::Object(map);
        }
        entries
            .iter()
            .find(|e| e.active)
            .map(|e| e.value.clone())
            .unwrap_or(serde_json::Value::Null)
    }

    /// Activates `node`'s outgoing edges: an edge is
    /// active if its source port matches the branch the node emitted
    /// (`condition`/`switch` steps, or a group's `GroupOutcome.port`), or —
    /// absent a branch — its `condition` expression evaluates truthy (or it
    /// has none). `output` is `None` when `node` itself was skipped, in
    /// which case every outgoing edge is inactive. Every outgoing edge's
    /// target predecessor count is decremented regardless of activity, so a
    /// node with no taken path still resolves into `Skipped` rather than
    /// starving forever.
    fn activate_successors(
        &self,
        node: &NodeRef,
        output: Option<&serde_json::Value>,
        pending: &mut HashMap<NodeRef, usize>,
        ready: &mut VecDeque<NodeRef>,
        inbound: &mut HashMap<NodeRef, Vec<Inbound>>,
        ctx: &RunContext,
    ) {
        let branch = output.and_then(|o| branch_of(o));
        let source_name = match node {
            NodeRef::Step { id } => self.names.get(id).cloned().unwrap_or_else(|| id.to_string()),
            NodeRef::Group { id } => groups::group_label(*id),
        };
        let snapshot = ctx.public_snapshot();

        for edge in self.plan.adjacency.get(node).into_iter().flatten() {
            let active = match (branch, output) {
                (Some(b), _) => edge.source_port == b,
                (None, Some(_)) => edge
                    .condition
                    .as_deref()
                    .map_or(true, |expr| eval_condition(expr, &snapshot).unwrap_or(false)),
                (None, None) => false,
            };
            inbound.entry(edge.target.clone()).or_default().push(Inbound {
                source_name: source_name.clone(),
                active,
                value: output.cloned().unwrap_or(serde_json::Value::Null),
            });
            if let Some(count) = pending.get_mut(&edge.target) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.push_back(edge.target.clone());
                }
            }
        }
    }

    /// Looks up the nearest enclosing `try_catch` group for `group_chain`
    /// (innermost first); if found, the failure is not terminal — the
    /// caller should let the (already-running) `try_catch` interpreter's
    /// own retry/catch handling have dealt with it (that happens inside
    /// [`Self::run_group`] itself, so by the time control returns here a
    /// `try_catch` ancestor has already been exhausted). Otherwise the
    /// failure ends the run.
    fn route_failure(&self, group_chain: &[Uuid], error: EngineError) -> Option<(RunStatus, Option<serde_json::Value>, Option<EngineError>)> {
        let has_try_catch_ancestor = group_chain
            .iter()
            .filter_map(|id| self.plan.group(*id))
            .any(|g| g.group_type == workflow_core::model::GroupType::TryCatch);
        if has_try_catch_ancestor {
            // The enclosing try_catch's own `run_group` call already
            // absorbed this failure (it calls `groups::try_catch::run`,
            // which only returns `Failed` once its own retries are
            // exhausted) — reaching here with a group_chain ancestor means
            // the failure originated inside that group's body and will be
            // surfaced as that group's own outcome, not the run's.
            None
        } else {
            Some((RunStatus::Failed, None, Some(error)))
        }
    }

    async fn run_group(&self, group: &workflow_core::compiler::CompiledGroup, input: serde_json::Value, ctx: &mut RunContext, cancel: &CancelToken) -> GroupOutcome {
        let runner: Arc<dyn StepRunner> = Arc::new(self.as_step_runner());
        dispatch_group(group, input, ctx, &self.names, runner, cancel).await
    }

    /// A cheap `Arc`-free handle implementing [`StepRunner`] by delegating
    /// back to `self`'s own step-dispatch path, so group interpreters and
    /// the top-level loop share one code path for running a leaf step.
    fn as_step_runner(&self) -> SchedulerStepRunner {
        SchedulerStepRunner {
            plan: Arc::clone(&self.plan),
            machine: Arc::clone(&self.machine),
            credential_source: Arc::clone(&self.credential_source),
            crypto: Arc::clone(&self.crypto),
            names: self.names.clone(),
        }
    }

    /// Commits the run's terminal transition. Modeled as a zero-duration
    /// marker `StepRun` so it rides the same atomic `RunContextDelta` path
    /// every other commit uses, rather than requiring `RunStore` to grow a
    /// second write path for run-level status alone.
    async fn finalize(&self, run_id: Uuid, status: RunStatus, output: Option<serde_json::Value>, error: Option<EngineError>, sequence_number: u64) {
        let now = chrono::Utc::now();
        let marker = StepRun {
            id: Uuid::new_v4(),
            run_id,
            step_id: Uuid::nil(),
            step_name: "__run_end__".to_string(),
            status: StepRunStatus::Succeeded,
            attempt: 1,
            sequence_number: sequence_number + 1,
            input: serde_json::Value::Null,
            output: None,
            error: None,
            duration_ms: Some(0),
            pinned_input: None,
            started_at: now,
            ended_at: Some(now),
        };
        let delta = RunContextDelta {
            run_status: Some(status),
            run_output: output,
            run_error: error,
            ..Default::default()
        };
        if let Err(err) = self.store.commit_step_run(marker, delta).await {
            tracing::error!(%run_id, %err, "failed to commit run completion");
        }
    }
}

/// Dispatches a compiled group to its interpreter — the one place that
/// knows how `group_type` maps onto `groups::*::run`, shared by the
/// top-level loop (via [`Scheduler::run_group`]) and by
/// [`SchedulerStepRunner::run_step`]'s nested-group branch, so a group
/// referenced from inside another group's body runs through the exact same
/// path as one referenced from the plan's top level.
async fn dispatch_group(
    group: &workflow_core::compiler::CompiledGroup,
    input: serde_json::Value,
    ctx: &mut RunContext,
    names: &HashMap<Uuid, String>,
    runner: Arc<dyn StepRunner>,
    cancel: &CancelToken,
) -> GroupOutcome {
    use workflow_core::model::GroupType;
    match group.group_type {
        GroupType::Parallel => groups::parallel::run(group, input, &*ctx, names, runner, cancel).await,
        GroupType::TryCatch => groups::try_catch::run(group, input, ctx, names, runner.as_ref(), cancel).await,
        GroupType::Foreach => groups::foreach::run(group, ctx, names, runner, cancel).await,
        GroupType::While => groups::while_loop::run(group, input, ctx, names, runner.as_ref(), cancel).await,
    }
}

/// Converts a group's terminal outcome into the [`StepOutcome`] shape
/// [`StepRunner::run_step`] returns, so a nested group looks to its parent
/// interpreter's `run_body_sequential` like any other body node.
fn group_outcome_to_step_outcome(outcome: GroupOutcome) -> StepOutcome {
    StepOutcome {
        status: outcome.status,
        output: Some(outcome.output),
        error: outcome.error,
        attempts: 1,
        usage: Vec::new(),
    }
}

/// Replays every succeeded [`StepRun`] from a resumed run's history into
/// `ctx`, in commit order, so `$steps.<name>.output` reads as it would have
/// by the time the run first reached its target step. Later duplicates (a
/// step re-executed by an earlier resume) naturally overwrite earlier ones.
fn replay_succeeded_outputs(ctx: &mut RunContext, history: &[StepRun]) {
    let mut ordered: Vec<&StepRun> = history.iter().filter(|sr| sr.status == StepRunStatus::Succeeded).collect();
    ordered.sort_by_key(|sr| sr.sequence_number);
    for step_run in ordered {
        ctx.record_step_output(step_run.step_name.clone(), step_run.output.clone().unwrap_or(serde_json::Value::Null));
    }
}

/// The resolved input for a resumed/single-stepped node: an explicit
/// override if the caller supplied one, else whatever input that step was
/// last recorded running with, else `null` for a step with no prior history.
fn resolve_resume_input(history: &[StepRun], target_step_id: Uuid, input_override: Option<serde_json::Value>) -> serde_json::Value {
    input_override.unwrap_or_else(|| {
        history
            .iter()
            .filter(|sr| sr.step_id == target_step_id)
            .max_by_key(|sr| sr.sequence_number)
            .map(|sr| sr.input.clone())
            .unwrap_or(serde_json::Value::Null)
    })
}

/// The highest attempt number already committed for each step in a run's
/// history, so a resumed execution's first attempt continues the count
/// rather than restarting at `1`.
fn base_attempts_by_step(history: &[StepRun]) -> HashMap<Uuid, u32> {
    let mut base = HashMap::new();
    for step_run in history {
        base.entry(step_run.step_id)
            .and_modify(|max: &mut u32| *max = (*max).max(step_run.attempt))
            .or_insert(step_run.attempt);
    }
    base
}

fn parent_chain(plan: &ExecutionPlan, parent: Option<Uuid>) -> Vec<Uuid> {
    let mut chain = Vec::new();
    let mut cur = parent;
    while let Some(id) = cur {
        chain.push(id);
        cur = plan.group(id).and_then(|g| g.parent_group_id);
    }
    chain.reverse();
    chain
}

fn synthetic_record(run_id: Uuid, step_id: Uuid, name: &str, status: StepRunStatus, attempt: u32, sequence_number: u64) -> StepRun {
    let now = chrono::Utc::now();
    StepRun {
        id: Uuid::new_v4(),
        run_id,
        step_id,
        step_name: name.to_string(),
        status,
        attempt,
        sequence_number,
        input: serde_json::Value::Null,
        output: None,
        error: None,
        duration_ms: Some(0),
        pinned_input: None,
        started_at: now,
        ended_at: Some(now),
    }
}

/// The [`StepRunner`] the group interpreters drive body steps through —
/// deliberately independent of `Scheduler` (no top-level ready-set state),
/// so nested groups can recurse into [`Scheduler::run_group`]-equivalent
/// logic without re-entering the outer ready-set loop.
#[derive(Clone)]
struct SchedulerStepRunner {
    plan: Arc<ExecutionPlan>,
    machine: Arc<StepMachine>,
    credential_source: Arc<dyn CredentialSource>,
    crypto: Arc<dyn CryptoCollaborator>,
    names: HashMap<Uuid, String>,
}

#[async_trait::async_trait]
impl StepRunner for SchedulerStepRunner {
    async fn run_step(&self, node: NodeRef, input: serde_json::Value, ctx: &mut RunContext, cancel: &CancelToken) -> StepOutcome {
        let step_id = match node {
            NodeRef::Step { id } => id,
            NodeRef::Group { id } => {
                let Some(group) = self.plan.group(id) else {
                    return StepOutcome {
                        status: StepRunStatus::Failed,
                        output: None,
                        error: Some(EngineError::permanent(format!("unknown group {id} in group body"))),
                        attempts: 0,
                        usage: Vec::new(),
                    };
                };
                let runner: Arc<dyn StepRunner> = Arc::new(self.clone());
                let outcome = dispatch_group(group, input, ctx, &self.names, runner, cancel).await;
                return group_outcome_to_step_outcome(outcome);
            }
        };
        let Some(step) = self.plan.step(step_id) else {
            return StepOutcome {
                status: StepRunStatus::Failed,
                output: None,
                error: Some(EngineError::permanent(format!("unknown step {step_id} in group body"))),
                attempts: 0,
                usage: Vec::new(),
            };
        };
        let credentials = match CredentialResolver::new(self.credential_source.as_ref(), self.crypto.as_ref())
            .resolve(ctx.tenant_id, &step.credential_bindings)
        {
            Ok(c) => c,
            Err(error) => {
                return StepOutcome {
                    status: StepRunStatus::Failed,
                    output: None,
                    error: Some(error),
                    attempts: 0,
                    usage: Vec::new(),
                }
            }
        };
        let eval_ctx = ctx.snapshot(
            credentials
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.expose().to_string())))
                .collect(),
            workflow_core::expr::EvalCapabilities::with_secrets(),
        );
        self.machine
            .run(ctx.run_id, ctx.tenant_id, 0, step, input, &eval_ctx, &credentials, cancel, 0)
            .await
    }
}

#[async_trait::async_trait]
impl SubflowRunner for Scheduler {
    async fn run_subflow(&self, tenant_id: Uuid, project_id: Uuid, input: serde_json::Value) -> Result<serde_json::Value> {
        let plan = self.plans.load_plan(tenant_id, project_id).await?;
        let run_id = Uuid::new_v4();
        let ctx = RunContext::new(run_id, tenant_id, plan.entry, input, HashMap::new(), HashMap::new(), HashMap::new());
        let scheduler = Scheduler::new(
            Arc::clone(&plan),
            Arc::clone(&self.machine),
            Arc::clone(&self.store),
            Arc::clone(&self.credential_source),
            Arc::clone(&self.crypto),
            Arc::clone(&self.plans),
            Arc::clone(&self.prices),
        );
        let outcome = scheduler.run(ctx, &CancelToken::new()).await;
        match outcome.status {
            RunStatus::Completed => Ok(outcome.output.unwrap_or(serde_json::Value::Null)),
            _ => Err(outcome.error.unwrap_or_else(|| EngineError::permanent("subflow did not complete"))),
        }
    }
}

#[async_trait::async_trait]
impl SiblingStepRunner for Scheduler {
    async fn run_sibling_step(&self, step_name: &str, arguments: serde_json::Value, ctx: &workflow_core::expr::EvalContext) -> Result<serde_json::Value> {
        let step_id = self
            .names
            .iter()
            .find(|(_, name)| name.as_str() == step_name)
            .map(|(id, _)| *id)
            .ok_or_else(|| EngineError::permanent(format!("agent tool step `{step_name}` not found in plan")))?;
        let step = self
            .plan
            .step(step_id)
            .ok_or_else(|| EngineError::permanent(format!("agent tool step `{step_name}` not found in plan")))?;
        let tenant_id = ctx
            .run
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_default();
        let credentials = CredentialResolver::new(self.credential_source.as_ref(), self.crypto.as_ref())
            .resolve(tenant_id, &step.credential_bindings)?;
        let outcome = self
            .machine
            .run(
                ctx.run.get("id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default(),
                ctx.run.get("tenant_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default(),
                0,
                step,
                arguments,
                ctx,
                &credentials,
                &CancelToken::new(),
                0,
            )
            .await;
        match outcome.status {
            StepRunStatus::Succeeded => Ok(outcome.output.unwrap_or(serde_json::Value::Null)),
            _ => Err(outcome.error.unwrap_or_else(|| EngineError::permanent(format!("agent tool step `{step_name}` failed")))),
        }
    }
}
