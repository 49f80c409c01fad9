//! Trigger Ingress (C10): turns an external event — a manual
//! submission, a schedule fire, a webhook POST — into a [`Run`] bound to a
//! specific start step, after schema-validating and (for webhooks)
//! signature-verifying the payload. Collapses the separate
//! `TriggerService`/`WebhookService` pair into one collaborator written
//! against [`RunStore`] alone, the same way the rest of the engine depends
//! on persistence only through that trait.

use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;
use uuid::Uuid;
use workflow_core::expr::EvalContext;
use workflow_core::model::{ProjectDefinition, Run, RunStatus, Step, TriggerType, TriggeredBy};
use workflow_checkpoint::RunStore;

use crate::error::{Result, SchemaViolation, TriggerError};
use crate::idempotency::IdempotencyWindow;
use crate::schedule::Schedule;
use crate::webhook;

/// Translates external events into run submissions.
pub struct Ingress {
    store: Arc<dyn RunStore>,
    idempotency: IdempotencyWindow,
}

impl Ingress {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            idempotency: IdempotencyWindow::default(),
        }
    }

    /// `SubmitManual(project, start_step, input, idempotency_key?) -> run_id`
    /// . `start_step_id` is required only when the project
    /// declares more than one manual-triggerable start.
    pub async fn submit_manual(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        project_version: u32,
        definition: &ProjectDefinition,
        start_step_id: Option<Uuid>,
        input: Value,
        idempotency_key: Option<String>,
    ) -> Result<Uuid> {
        let start = resolve_start_step(definition, start_step_id, TriggerType::Manual)?;
        validate_input(start, &input)?;
        self.create(
            tenant_id,
            project_id,
            project_version,
            start.id,
            input,
            TriggeredBy::Manual,
            Value::Null,
            idempotency_key,
        )
        .await
    }

    /// `DeliverWebhook(project, start_step, raw_body, signature, timestamp,
    /// idempotency_key?) -> run_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn deliver_webhook(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        project_version: u32,
        definition: &ProjectDefinition,
        start_step_id: Uuid,
        raw_body: &[u8],
        signature_header: &str,
        timestamp: i64,
        now: i64,
        idempotency_key: Option<String>,
    ) -> Result<Uuid> {
        let start = resolve_start_step(definition, Some(start_step_id), TriggerType::Webhook)?;
        let secret = start
            .trigger_config
            .get("webhook_secret")
            .and_then(Value::as_str)
            .ok_or_else(|| TriggerError::WrongTriggerKind(start.id, TriggerType::Webhook))?;
        webhook::verify(secret, raw_body, signature_header, timestamp, now, webhook::DEFAULT_REPLAY_WINDOW_SECS)?;

        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| TriggerError::SchemaValidation(vec![SchemaViolation { field: "$".into(), message: e.to_string() }]))?;
        let input = match start.trigger_config.get("input_mapping") {
            Some(mapping) if !mapping.is_null() => apply_input_mapping(mapping, payload),
            _ => payload,
        };
        validate_input(start, &input)?;

        self.create(
            tenant_id,
            project_id,
            project_version,
            start.id,
            input,
            TriggeredBy::Webhook,
            Value::Null,
            idempotency_key,
        )
        .await
    }

    /// `FireSchedule(schedule) -> run_id`.
    pub async fn fire_schedule(
        &self,
        schedule: &Schedule,
        project_version: u32,
        definition: &ProjectDefinition,
    ) -> Result<Uuid> {
        let start = resolve_start_step(definition, Some(schedule.start_step_id), TriggerType::Schedule)?;
        validate_input(start, &schedule.input)?;
        self.create(
            schedule.tenant_id,
            schedule.project_id,
            project_version,
            start.id,
            schedule.input.clone(),
            TriggeredBy::Schedule,
            serde_json::json!({ "schedule_id": schedule.id }),
            None,
        )
        .await
    }

    /// Trusted internal/agent-chat submission. `chat_session_id` is only meaningful
    /// for the latter.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_trusted(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        project_version: u32,
        definition: &ProjectDefinition,
        start_step_id: Option<Uuid>,
        input: Value,
        triggered_by: TriggeredBy,
        chat_session_id: Option<String>,
        parent_run_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let trigger_type = match triggered_by {
            TriggeredBy::AgentChat => TriggerType::AgentChat,
            _ => TriggerType::Internal,
        };
        let start = resolve_start_step(definition, start_step_id, trigger_type)?;
        validate_input(start, &input)?;
        let metadata = chat_session_id
            .map(|id| serde_json::json!({ "chat_session_id": id }))
            .unwrap_or(Value::Null);
        let run_id = self
            .create(tenant_id, project_id, project_version, start.id, input, triggered_by, metadata, None)
            .await?;
        if let Some(parent) = parent_run_id {
            tracing::debug!(%run_id, %parent, "submitted run with parent");
        }
        Ok(run_id)
    }

    /// `SubmitResume(source_run, target, input_override?, single_step) ->
    /// run_id`. Creates a new [`Run`] row with [`TriggeredBy::Resume`] and
    /// `parent_run_id` set to `source_run_id`, rather than mutating the
    /// original run's history in place, so each resume attempt is its own
    /// auditable record the consumer's claim loop picks up the same way it
    /// picks up any other pending run. `target` is a step or block-group id
    /// from `source_run_id`'s own project version; `workflow-host`'s claim
    /// handler reads it back out of `trigger_metadata` to call
    /// `Scheduler::resume` or `Scheduler::execute_single_step`.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_resume(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        project_version: u32,
        definition: &ProjectDefinition,
        source_run_id: Uuid,
        target: Uuid,
        input_override: Option<Value>,
        single_step: bool,
    ) -> Result<Uuid> {
        let known = definition.steps.iter().any(|s| s.id == target) || definition.block_groups.iter().any(|g| g.id == target);
        if !known {
            return Err(TriggerError::TargetNodeNotFound(target));
        }
        let run_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let run = Run {
            id: run_id,
            tenant_id,
            project_id,
            project_version,
            start_step_id: target,
            status: RunStatus::Pending,
            run_number: 0,
            input: Value::Null,
            output: None,
            error: None,
            triggered_by: TriggeredBy::Resume,
            trigger_metadata: serde_json::json!({
                "source_run_id": source_run_id,
                "target": target,
                "input_override": input_override,
                "single_step": single_step,
            }),
            parent_run_id: Some(source_run_id),
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_run(run).await?;
        Ok(run_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        project_version: u32,
        start_step_id: Uuid,
        input: Value,
        triggered_by: TriggeredBy,
        trigger_metadata: Value,
        idempotency_key: Option<String>,
    ) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.idempotency.check_or_insert(key, run_id).await {
                return Ok(existing);
            }
        }
        let now = chrono::Utc::now();
        let run = Run {
            id: run_id,
            tenant_id,
            project_id,
            project_version,
            start_step_id,
            status: RunStatus::Pending,
            run_number: 0,
            input,
            output: None,
            error: None,
            triggered_by,
            trigger_metadata,
            parent_run_id: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        };
        self.store.create_run(run).await?;
        Ok(run_id)
    }
}

fn resolve_start_step(
    definition: &ProjectDefinition,
    start_step_id: Option<Uuid>,
    trigger_type: TriggerType,
) -> Result<&Step> {
    if let Some(id) = start_step_id {
        let step = definition
            .steps
            .iter()
            .find(|s| s.id == id)
            .ok_or(TriggerError::StartStepNotFound(id))?;
        if step.trigger_type != Some(trigger_type) {
            return Err(TriggerError::WrongTriggerKind(step.id, trigger_type));
        }
        return Ok(step);
    }
    let mut matches = definition
        .steps
        .iter()
        .filter(|s| s.trigger_type == Some(trigger_type));
    let first = matches.next().ok_or(TriggerError::StartStepNotFound(Uuid::nil()))?;
    if matches.next().is_some() {
        return Err(TriggerError::AmbiguousStartStep);
    }
    Ok(first)
}

/// Schema validation of the start step's `input_schema`, read from `step.config.input_schema` since
/// the core `Step` model carries no dedicated field for it.
fn validate_input(start: &Step, input: &Value) -> Result<()> {
    let Some(schema) = start.config.get("input_schema").filter(|s| !s.is_null()) else {
        return Ok(());
    };
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| TriggerError::SchemaValidation(vec![SchemaViolation { field: "input_schema".into(), message: e.to_string() }]))?;
    if let Err(errors) = compiled.validate(input) {
        let violations = errors
            .map(|e| SchemaViolation {
                field: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();
        return Err(TriggerError::SchemaValidation(violations));
    }
    Ok(())
}

/// Projects a webhook payload into the run input per
/// `trigger_config.input_mapping`: an object of `{target_field: source_path}`
/// resolved against the raw payload as `$input`.
fn apply_input_mapping(mapping: &Value, payload: Value) -> Value {
    let Some(fields) = mapping.as_object() else {
        return payload;
    };
    let ctx = EvalContext::new(payload);
    let mut out = serde_json::Map::new();
    for (target, source) in fields {
        let Some(path) = source.as_str() else { continue };
        let value = workflow_core::expr::resolve_path(path, &ctx).unwrap_or(Value::Null);
        out.insert(target.clone(), value);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_checkpoint::InMemoryRunStore;
    use workflow_core::model::StepType;

    fn start_step(trigger_type: TriggerType, input_schema: Option<Value>) -> Step {
        Step {
            id: Uuid::new_v4(),
            name: "start".into(),
            step_type: StepType::Start,
            config: input_schema
                .map(|s| serde_json::json!({ "input_schema": s }))
                .unwrap_or(Value::Null),
            credential_bindings: Default::default(),
            block_group_id: None,
            group_role: None,
            retry_config: None,
            trigger_type: Some(trigger_type),
            trigger_config: Value::Null,
            timeout_ms: None,
        }
    }

    fn definition(steps: Vec<Step>) -> ProjectDefinition {
        ProjectDefinition {
            version: 1,
            steps,
            edges: Vec::new(),
            block_groups: Vec::new(),
            variables: Default::default(),
            error_workflow_id: None,
        }
    }

    #[tokio::test]
    async fn manual_submission_creates_a_pending_run() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store.clone());
        let step = start_step(TriggerType::Manual, None);
        let def = definition(vec![step.clone()]);
        let tenant = Uuid::new_v4();
        let project = Uuid::new_v4();

        let run_id = ingress
            .submit_manual(tenant, project, 1, &def, None, serde_json::json!({"x": 1}), None)
            .await
            .unwrap();
        let run = store.get_run(tenant, run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.start_step_id, step.id);
    }

    #[tokio::test]
    async fn schema_violations_are_rejected_before_enqueue() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store);
        let schema = serde_json::json!({"type": "object", "required": ["name"]});
        let step = start_step(TriggerType::Manual, Some(schema));
        let def = definition(vec![step]);

        let err = ingress
            .submit_manual(Uuid::new_v4(), Uuid::new_v4(), 1, &def, None, serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn repeated_idempotency_key_returns_the_same_run() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store);
        let step = start_step(TriggerType::Manual, None);
        let def = definition(vec![step]);
        let tenant = Uuid::new_v4();
        let project = Uuid::new_v4();

        let first = ingress
            .submit_manual(tenant, project, 1, &def, None, serde_json::json!({}), Some("key-1".into()))
            .await
            .unwrap();
        let second = ingress
            .submit_manual(tenant, project, 1, &def, None, serde_json::json!({}), Some("key-1".into()))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn submit_resume_creates_a_pending_run_linked_to_its_parent() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store.clone());
        let step = start_step(TriggerType::Manual, None);
        let def = definition(vec![step.clone()]);
        let tenant = Uuid::new_v4();
        let project = Uuid::new_v4();
        let source_run_id = Uuid::new_v4();

        let run_id = ingress
            .submit_resume(tenant, project, 1, &def, source_run_id, step.id, Some(serde_json::json!({"fixed": true})), false)
            .await
            .unwrap();
        let run = store.get_run(tenant, run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.start_step_id, step.id);
        assert_eq!(run.parent_run_id, Some(source_run_id));
        assert_eq!(run.triggered_by, TriggeredBy::Resume);
    }

    #[tokio::test]
    async fn submit_resume_rejects_an_unknown_target() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store);
        let def = definition(vec![start_step(TriggerType::Manual, None)]);

        let err = ingress
            .submit_resume(Uuid::new_v4(), Uuid::new_v4(), 1, &def, Uuid::new_v4(), Uuid::new_v4(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::TargetNodeNotFound(_)));
    }

    #[tokio::test]
    async fn ambiguous_start_step_requires_an_explicit_id() {
        let store = Arc::new(InMemoryRunStore::new());
        let ingress = Ingress::new(store);
        let def = definition(vec![start_step(TriggerType::Manual, None), start_step(TriggerType::Manual, None)]);

        let err = ingress
            .submit_manual(Uuid::new_v4(), Uuid::new_v4(), 1, &def, None, Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::AmbiguousStartStep));
    }
}
