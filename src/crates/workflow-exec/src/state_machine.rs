//! Step State Machine (C5): drives one step through
//! `pending -> running -> {succeeded, failed, cancelled}`, with retry
//! scheduling, a per-attempt timeout, and output capture committed
//! atomically with the `succeeded`/`failed` transition.

use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use workflow_core::compiler::CompiledStep;
use workflow_core::error::{EngineError, ErrorKind};
use workflow_core::expr::EvalContext;
use workflow_core::model::{StepRun, StepRunStatus, StreamChunk, UsageRecord};
use workflow_checkpoint::{RunContextDelta, RunStore};

use crate::cancel::CancelToken;
use crate::credentials::Secret;
use crate::dispatch::ExecutorRegistry;
use crate::usage::UsageRecorder;

/// Default per-attempt timeout when a step carries no override.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// What one step execution (across every retry attempt) produced, handed
/// back to the scheduler to decide downstream edge activation.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepRunStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<EngineError>,
    pub attempts: u32,
    pub usage: Vec<UsageRecord>,
}

impl StepOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.status, StepRunStatus::Succeeded)
    }
}

/// Runs a single step to a terminal [`StepOutcome`], retrying per its
/// [`workflow_core::model::RetryConfig`] and committing each attempt as a
/// [`StepRun`] through the [`RunStore`].
pub struct StepMachine {
    registry: Arc<ExecutorRegistry>,
    store: Arc<dyn RunStore>,
    usage: Arc<UsageRecorder>,
}

impl StepMachine {
    #[must_use]
    pub fn new(registry: Arc<ExecutorRegistry>, store: Arc<dyn RunStore>, usage: Arc<UsageRecorder>) -> Self {
        Self { registry, store, usage }
    }

    /// `config.budget_key` / `config.budget_amount_usd` on a step, if both
    /// are set.
    fn budget_config(step: &CompiledStep) -> Option<(String, f64)> {
        let key = step.config.get("budget_key")?.as_str()?.to_string();
        let amount = step.config.get("budget_amount_usd")?.as_f64()?;
        Some((key, amount))
    }

    /// Drives `step` through however many attempts its retry policy allows,
    /// persisting each attempt and returning the terminal outcome.
    ///
    /// `sequence_number` must be obtained from the caller's authoritative
    /// counter for this run (the scheduler is the sole mutator of `ctx`); the
    /// in-memory store additionally re-numbers it as a defence-in-depth
    /// guarantee. `base_attempt` is the highest attempt number this step has
    /// already committed in a prior pass over the run (`0` for a step's
    /// first execution); resume re-executes a step's successors as new
    /// attempts layered on top of that history rather than attempt `1`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        run_id: Uuid,
        tenant_id: Uuid,
        sequence_number: u64,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
        base_attempt: u32,
    ) -> StepOutcome {
        let max_attempts = step.retry_config.max_retries + 1;
        let mut usage = Vec::new();
        let mut last_error = None;
        let budget = Self::budget_config(step);

        for attempt in 1..=max_attempts {
            let effective_attempt = base_attempt + attempt;
            if cancel.is_cancelled() {
                return StepOutcome {
                    status: StepRunStatus::Cancelled,
                    output: None,
                    error: Some(EngineError::new(ErrorKind::Cancelled, "step cancelled before dispatch")),
                    attempts: effective_attempt.saturating_sub(1).max(0),
                    usage,
                };
            }

            if let Some((budget_key, budget_amount_usd)) = &budget {
                if let Err(error) = self.usage.check_budget(tenant_id, budget_key, *budget_amount_usd).await {
                    return StepOutcome {
                        status: StepRunStatus::Failed,
                        output: None,
                        error: Some(error),
                        attempts: effective_attempt.saturating_sub(1).max(0),
                        usage,
                    };
                }
            }

            let started_at = Utc::now();
            let step_run_id = Uuid::new_v4();
            let attempt_result = self
                .dispatch_with_timeout(step, resolved_input.clone(), ctx, credentials, cancel)
                .await;
            let ended_at = Utc::now();
            let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

            match attempt_result {
                Ok(result) => {
                    if let Some(mut rec) = result.usage.clone() {
                        rec.step_run_id = step_run_id;
                        let budget_key = budget.as_ref().map(|(key, _)| key.as_str());
                        match self.usage.record(rec.clone(), budget_key).await {
                            Ok(_cost) => usage.push(rec),
                            Err(err) => tracing::error!(%run_id, step = %step.name, %err, "failed to record usage"),
                        }
                    }
                    for chunk in result.streaming_chunks.clone() {
                        self.persist_chunk(step_run_id, chunk).await;
                    }
                    self.commit(
                        run_id,
                        step,
                        step_run_id,
                        effective_attempt,
                        sequence_number,
                        resolved_input.clone(),
                        StepRunStatus::Succeeded,
                        Some(result.output.clone()),
                        None,
                        started_at,
                        Some(ended_at),
                        duration_ms,
                    )
                    .await;
                    return StepOutcome {
                        status: StepRunStatus::Succeeded,
                        output: Some(result.output),
                        error: None,
                        attempts: effective_attempt,
                        usage,
                    };
                }
                Err(error) => {
                    let is_cancelled = error.kind == ErrorKind::Cancelled;
                    let will_retry = !is_cancelled
                        && attempt < max_attempts
                        && (error.kind.is_retryable() || step.retry_config.retry_on_errors.contains(&error.kind));

                    let status = if is_cancelled {
                        StepRunStatus::Cancelled
                    } else if will_retry {
                        StepRunStatus::Failed
                    } else {
                        StepRunStatus::Failed
                    };
                    self.commit(
                        run_id,
                        step,
                        step_run_id,
                        effective_attempt,
                        sequence_number,
                        resolved_input.clone(),
                        status,
                        None,
                        Some(error.clone()),
                        started_at,
                        Some(ended_at),
                        duration_ms,
                    )
                    .await;

                    if is_cancelled {
                        return StepOutcome {
                            status: StepRunStatus::Cancelled,
                            output: None,
                            error: Some(error),
                            attempts: effective_attempt,
                            usage,
                        };
                    }
                    if !will_retry {
                        return StepOutcome {
                            status: StepRunStatus::Failed,
                            output: None,
                            error: Some(error),
                            attempts: effective_attempt,
                            usage,
                        };
                    }
                    last_error = Some(error.clone());
                    let delay = Self::backoff_delay(&step.retry_config, attempt, &error);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            return StepOutcome {
                                status: StepRunStatus::Cancelled,
                                output: None,
                                error: Some(EngineError::new(ErrorKind::Cancelled, "step cancelled during backoff")),
                                attempts: effective_attempt,
                                usage,
                            };
                        }
                    }
                }
            }
        }

        StepOutcome {
            status: StepRunStatus::Failed,
            output: None,
            error: last_error,
            attempts: base_attempt + max_attempts,
            usage,
        }
    }

    async fn dispatch_with_timeout(
        &self,
        step: &CompiledStep,
        resolved_input: serde_json::Value,
        ctx: &EvalContext,
        credentials: &HashMap<String, Secret>,
        cancel: &CancelToken,
    ) -> workflow_core::error::Result<crate::dispatch::StepResult> {
        let timeout = Duration::from_millis(step.timeout_ms.max(1));
        tokio::select! {
            result = self.registry.dispatch(step, resolved_input, ctx, credentials, cancel) => result,
            () = tokio::time::sleep(timeout) => {
                cancel.cancel();
                Err(EngineError::new(ErrorKind::Timeout, format!("step `{}` exceeded its {}ms timeout", step.name, step.timeout_ms)))
            }
            () = cancel.cancelled() => {
                Err(EngineError::new(ErrorKind::Cancelled, format!("step `{}` cancelled", step.name)))
            }
        }
    }

    /// Backoff delay for the next attempt: `delay_ms * (2^(n-1))` when
    /// `exponential_backoff` is set, else a flat `delay_ms`; jittered only
    /// for `RateLimit` errors, mirroring the `RetryPolicy` jitter.
    fn backoff_delay(retry_config: &workflow_core::model::RetryConfig, attempt: u32, error: &EngineError) -> Duration {
        let base = if retry_config.exponential_backoff {
            retry_config.delay_ms.saturating_mul(1u64 << (attempt - 1).min(20))
        } else {
            retry_config.delay_ms
        };
        let millis = if retry_config.enable_jitter && error.kind == ErrorKind::RateLimit {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            (base as f64 * factor) as u64
        } else {
            base
        };
        Duration::from_millis(millis)
    }

    async fn persist_chunk(&self, step_run_id: Uuid, chunk: StreamChunk) {
        if let Err(err) = self.store.append_stream_chunk(step_run_id, chunk).await {
            tracing::warn!(%step_run_id, %err, "failed to persist stream chunk");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        run_id: Uuid,
        step: &CompiledStep,
        step_run_id: Uuid,
        attempt: u32,
        sequence_number: u64,
        input: serde_json::Value,
        status: StepRunStatus,
        output: Option<serde_json::Value>,
        error: Option<EngineError>,
        started_at: chrono::DateTime<Utc>,
        ended_at: Option<chrono::DateTime<Utc>>,
        duration_ms: u64,
    ) {
        let step_run = StepRun {
            id: step_run_id,
            run_id,
            step_id: step.id,
            step_name: step.name.clone(),
            status,
            attempt,
            sequence_number,
            input,
            output: output.clone(),
            error,
            duration_ms: Some(duration_ms),
            pinned_input: None,
            started_at,
            ended_at,
        };
        let delta = RunContextDelta {
            step_output: output.map(|o| (step.name.clone(), o)),
            ..Default::default()
        };
        if let Err(err) = self.store.commit_step_run(step_run, delta).await {
            tracing::error!(%run_id, step = %step.name, %err, "failed to commit step run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use workflow_core::model::{RetryConfig, StepType};
    use workflow_checkpoint::InMemoryRunStore;
    use crate::usage::StaticPriceTable;

    fn test_usage_recorder(store: Arc<InMemoryRunStore>) -> Arc<UsageRecorder> {
        Arc::new(UsageRecorder::new(store, Arc::new(StaticPriceTable::with_default_pricing())))
    }

    struct FlakyExecutor {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl crate::dispatch::Executor for FlakyExecutor {
        async fn execute(
            &self,
            _step: &CompiledStep,
            resolved_input: serde_json::Value,
            _ctx: &EvalContext,
            _credentials: &HashMap<String, Secret>,
            _cancel: &CancelToken,
        ) -> workflow_core::error::Result<crate::dispatch::StepResult> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(EngineError::new(ErrorKind::Transient, "flaky failure"));
            }
            Ok(crate::dispatch::StepResult::new(resolved_input))
        }
    }

    fn retry_step() -> CompiledStep {
        CompiledStep {
            id: Uuid::new_v4(),
            name: "flaky".into(),
            step_type: StepType::Code,
            config: serde_json::Value::Null,
            credential_bindings: HashMap::new(),
            retry_config: RetryConfig {
                max_retries: 3,
                delay_ms: 1,
                exponential_backoff: false,
                retry_on_errors: Vec::new(),
                enable_jitter: false,
            },
            timeout_ms: 5_000,
            group_chain: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let mut registry = ExecutorRegistry::new();
        registry.register(
            StepType::Code,
            Arc::new(FlakyExecutor {
                failures_remaining: AtomicU32::new(2),
            }),
        );
        let store = Arc::new(InMemoryRunStore::new());
        let machine = StepMachine::new(Arc::new(registry), store.clone(), test_usage_recorder(store));
        let ctx = EvalContext::new(serde_json::Value::Null);
        let outcome = machine
            .run(
                Uuid::new_v4(),
                Uuid::new_v4(),
                0,
                &retry_step(),
                serde_json::json!({"v": 1}),
                &ctx,
                &HashMap::new(),
                &CancelToken::new(),
                0,
            )
            .await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_fails() {
        let mut registry = ExecutorRegistry::new();
        registry.register(
            StepType::Code,
            Arc::new(FlakyExecutor {
                failures_remaining: AtomicU32::new(10),
            }),
        );
        let store = Arc::new(InMemoryRunStore::new());
        let machine = StepMachine::new(Arc::new(registry), store.clone(), test_usage_recorder(store));
        let ctx = EvalContext::new(serde_json::Value::Null);
        let outcome = machine
            .run(
                Uuid::new_v4(),
                Uuid::new_v4(),
                0,
                &retry_step(),
                serde_json::Value::Null,
                &ctx,
                &HashMap::new(),
                &CancelToken::new(),
                0,
            )
            .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 4);
    }
}
