//! The per-run execution context: the one piece of mutable
//! state a run owns. The scheduler is its sole mutator; every executor
//! dispatch receives a read-only [`workflow_core::expr::EvalContext`]
//! snapshot and returns a fresh output rather than touching this directly.

use std::collections::HashMap;
use uuid::Uuid;
use workflow_core::expr::{EvalCapabilities, EvalContext};

/// The authoritative, mutable context for one run. Analogous to the
/// teacher's pregel channel state, but keyed by step name rather than
/// channel name, per `ctx` shape.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub tenant_id: Uuid,
    pub start_step_id: Uuid,
    inner: EvalContext,
}

impl RunContext {
    #[must_use]
    pub fn new(
        run_id: Uuid,
        tenant_id: Uuid,
        start_step_id: Uuid,
        input: serde_json::Value,
        project_variables: HashMap<String, serde_json::Value>,
        org_variables: HashMap<String, serde_json::Value>,
        personal_variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut inner = EvalContext::new(input);
        inner.project_variables = project_variables;
        inner.org_variables = org_variables;
        inner.personal_variables = personal_variables;
        inner.run = serde_json::json!({
            "id": run_id,
            "tenant_id": tenant_id,
            "start_step_id": start_step_id,
        });
        Self {
            run_id,
            tenant_id,
            start_step_id,
            inner,
        }
    }

    /// Record a completed step's output under `$steps.<name>.output`. Only
    /// the scheduler calls this, immediately after a successful commit.
    pub fn record_step_output(&mut self, step_name: impl Into<String>, output: serde_json::Value) {
        self.inner.record_step_output(step_name, output);
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.vars.insert(key.into(), value);
    }

    #[must_use]
    pub fn step_output(&self, step_name: &str) -> Option<&serde_json::Value> {
        self.inner.steps.get(step_name).and_then(|v| v.get("output"))
    }

    /// A read-only snapshot handed to a step executor, scoped to whether
    /// this particular dispatch may see `$secrets`.
    #[must_use]
    pub fn snapshot(&self, secrets: HashMap<String, serde_json::Value>, capabilities: EvalCapabilities) -> EvalContext {
        let mut snap = self.inner.clone();
        snap.secrets = secrets;
        snap.capabilities = capabilities;
        snap
    }

    /// A snapshot with no secrets exposed, for edge conditions and
    /// group-level expressions that never need `$secrets`.
    #[must_use]
    pub fn public_snapshot(&self) -> EvalContext {
        self.inner.clone()
    }
}
