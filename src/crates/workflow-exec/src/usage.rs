//! Usage & Cost Recorder (C9): computes per-call cost from a
//! price table, persists the raw [`UsageRecord`] through [`RunStore`], and
//! enforces a pre-dispatch budget cap. Collapses the
//! `PricingService`/`BudgetService` pair (`orca::services::{pricing_service,
//! budget_service}`) into one collaborator written against the `RunStore`
//! trait alone rather than a `sqlx`-backed repository, the same way the rest
//! of `workflow-exec` depends on persistence only through the trait.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use workflow_core::error::{EngineError, ErrorKind, Result};
use workflow_core::model::{StepRun, StepRunStatus, UsageRecord};
use workflow_checkpoint::RunStore;

/// USD price per 1000 tokens for a `(provider, model)` pair.
pub trait PriceTable: Send + Sync {
    /// Returns `(price_per_1k_input, price_per_1k_output)`. An unpriced
    /// pair (local models, unrecognized provider) returns `(0.0, 0.0)`
    /// rather than an error, matching the free-pricing fallback
    /// (`orca::services::pricing_service::get_pricing`).
    fn price_per_1k(&self, provider: &str, model: &str) -> (f64, f64);
}

/// In-process price table seeded with [`default_pricing`]. Rates can be
/// overridden per `(provider, model)` — the idiomatic stand-in for the
/// teacher's `llm_pricing` table without a database behind it.
#[derive(Debug, Default)]
pub struct StaticPriceTable {
    prices: HashMap<(String, String), (f64, f64)>,
}

impl StaticPriceTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// A table pre-populated with [`default_pricing`].
    #[must_use]
    pub fn with_default_pricing() -> Self {
        let mut table = Self::new();
        for (provider, model, price_in, price_out) in default_pricing() {
            table.set(provider, model, price_in, price_out);
        }
        table
    }

    pub fn set(&mut self, provider: impl Into<String>, model: impl Into<String>, price_per_1k_input: f64, price_per_1k_output: f64) {
        self.prices
            .insert((provider.into(), model.into()), (price_per_1k_input, price_per_1k_output));
    }
}

impl PriceTable for StaticPriceTable {
    fn price_per_1k(&self, provider: &str, model: &str) -> (f64, f64) {
        self.prices
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or((0.0, 0.0))
    }
}

/// Reference USD-per-1000-token rates for commonly configured providers,
/// grounded in the `orca::models::pricing::default_pricing`
/// table (rescaled from per-token to per-1000-token to match 
/// `price_in[provider,model]` convention).
fn default_pricing() -> Vec<(&'static str, &'static str, f64, f64)> {
    vec![
        ("openai", "gpt-4o", 5.0, 15.0),
        ("openai", "gpt-4-turbo", 10.0, 30.0),
        ("openai", "gpt-4", 30.0, 60.0),
        ("openai", "gpt-3.5-turbo", 0.5, 1.5),
        ("anthropic", "claude-3-opus", 15.0, 75.0),
        ("anthropic", "claude-3-sonnet", 3.0, 15.0),
        ("anthropic", "claude-3-haiku", 0.25, 1.25),
        ("anthropic", "claude-3-5-sonnet", 3.0, 15.0),
        ("anthropic", "claude-3-5-haiku", 0.8, 4.0),
        ("google", "gemini-1-5-pro", 1.25, 5.0),
        ("google", "gemini-pro", 0.5, 1.5),
        ("ollama", "llama2", 0.0, 0.0),
        ("llama_cpp", "default", 0.0, 0.0),
    ]
}

/// Cost computation, persistence, and budget enforcement for priced calls
/// . Held by the [`crate::state_machine::StepMachine`] and
/// consulted once before dispatching an `llm`/`agent`/`router` step and
/// once after a successful attempt that returned usage.
pub struct UsageRecorder {
    store: Arc<dyn RunStore>,
    prices: Arc<dyn PriceTable>,
}

impl UsageRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, prices: Arc<dyn PriceTable>) -> Self {
        Self { store, prices }
    }

    /// Pre-dispatch budget check: short-circuits with
    /// `ErrorKind::BudgetExceeded` once `budget_key`'s accumulated spend
    /// meets or exceeds `budget_amount_usd`. Steps with no configured
    /// `budget_key` are unmetered.
    pub async fn check_budget(&self, tenant_id: Uuid, budget_key: &str, budget_amount_usd: f64) -> Result<()> {
        let spent = self
            .store
            .accumulated_cost_usd(tenant_id, budget_key)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to read budget accumulator: {e}")))?;
        if spent >= budget_amount_usd {
            return Err(EngineError::new(
                ErrorKind::BudgetExceeded,
                format!("budget `{budget_key}` exhausted: ${spent:.4} spent of ${budget_amount_usd:.4} allotted"),
            ));
        }
        Ok(())
    }

    /// Computes cost for `usage`, persists the raw
    /// row, and increments `budget_key`'s accumulator when one applies.
    /// Returns the computed cost in USD.
    pub async fn record(&self, usage: UsageRecord, budget_key: Option<&str>) -> Result<f64> {
        let (price_in, price_out) = self.prices.price_per_1k(&usage.provider, &usage.model);
        let input_cost = usage.input_tokens as f64 / 1000.0 * price_in;
        let output_cost = usage.output_tokens as f64 / 1000.0 * price_out;
        let cost = input_cost + output_cost;
        let tenant_id = usage.tenant_id;

        self.store
            .record_usage(usage)
            .await
            .map_err(|e| EngineError::permanent(format!("failed to persist usage record: {e}")))?;

        if let Some(key) = budget_key {
            self.store
                .accumulate_cost(tenant_id, key, cost)
                .await
                .map_err(|e| EngineError::permanent(format!("failed to update budget accumulator: {e}")))?;
        }
        Ok(cost)
    }
}

/// Structured terminal-transition metrics: the
/// natural summary a recorder that already totals cost per run can produce
/// for free, logged once at `info` on run completion rather than persisted
/// as a new entity.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub step_run_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_attempts: u32,
    pub total_retries: u32,
    pub total_cost_usd: f64,
}

impl RunSummary {
    /// Summarizes a run's committed step-runs plus the total cost the
    /// recorder accumulated for it. `step_runs` is expected in commit
    /// order; `attempt` numbering within it yields the retry count.
    #[must_use]
    pub fn from_step_runs(step_runs: &[StepRun], total_cost_usd: f64) -> Self {
        let mut summary = Self {
            total_cost_usd,
            ..Self::default()
        };
        for run in step_runs {
            summary.step_run_count += 1;
            summary.total_attempts += run.attempt;
            if run.attempt > 1 {
                summary.total_retries += run.attempt - 1;
            }
            match run.status {
                StepRunStatus::Succeeded => summary.succeeded += 1,
                StepRunStatus::Failed => summary.failed += 1,
                _ => {}
            }
        }
        summary
    }

    /// Emits the summary at `info`, the level the reference codebase logs terminal
    /// run/checkpoint transitions at.
    pub fn log(&self, run_id: Uuid) {
        tracing::info!(
            %run_id,
            step_run_count = self.step_run_count,
            succeeded = self.succeeded,
            failed = self.failed,
            total_retries = self.total_retries,
            total_cost_usd = self.total_cost_usd,
            "run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_checkpoint::InMemoryRunStore;

    fn record(tenant_id: Uuid, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> UsageRecord {
        UsageRecord {
            tenant_id,
            run_id: Uuid::new_v4(),
            step_run_id: Uuid::new_v4(),
            provider: provider.to_string(),
            model: model.to_string(),
            operation: "llm".to_string(),
            input_tokens,
            output_tokens,
            latency_ms: 100,
            success: true,
        }
    }

    #[tokio::test]
    async fn computes_cost_from_price_table() {
        let store = Arc::new(InMemoryRunStore::new());
        let mut prices = StaticPriceTable::new();
        prices.set("openai", "gpt-4o", 5.0, 15.0);
        let recorder = UsageRecorder::new(store, Arc::new(prices));

        let tenant = Uuid::new_v4();
        let usage = record(tenant, "openai", "gpt-4o", 2000, 1000);
        let cost = recorder.record(usage, None).await.unwrap();
        assert!((cost - (2.0 * 5.0 + 1.0 * 15.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn budget_check_blocks_once_exhausted() {
        let store = Arc::new(InMemoryRunStore::new());
        let recorder = UsageRecorder::new(store, Arc::new(StaticPriceTable::with_default_pricing()));
        let tenant = Uuid::new_v4();

        recorder.check_budget(tenant, "daily", 1.0).await.unwrap();

        let usage = record(tenant, "anthropic", "claude-3-opus", 10_000, 10_000);
        recorder.record(usage, Some("daily")).await.unwrap();

        let err = recorder.check_budget(tenant, "daily", 1.0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BudgetExceeded);
    }

    #[test]
    fn summary_counts_retries_and_outcomes() {
        let step_runs = vec![
            StepRun {
                id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                step_id: Uuid::new_v4(),
                step_name: "a".into(),
                status: StepRunStatus::Succeeded,
                attempt: 3,
                sequence_number: 0,
                input: serde_json::Value::Null,
                output: None,
                error: None,
                duration_ms: Some(1),
                pinned_input: None,
                started_at: chrono::Utc::now(),
                ended_at: None,
            },
            StepRun {
                id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                step_id: Uuid::new_v4(),
                step_name: "b".into(),
                status: StepRunStatus::Failed,
                attempt: 1,
                sequence_number: 1,
                input: serde_json::Value::Null,
                output: None,
                error: None,
                duration_ms: Some(1),
                pinned_input: None,
                started_at: chrono::Utc::now(),
                ended_at: None,
            },
        ];
        let summary = RunSummary::from_step_runs(&step_runs, 0.42);
        assert_eq!(summary.step_run_count, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_retries, 2);
        assert!((summary.total_cost_usd - 0.42).abs() < 1e-9);
    }
}
