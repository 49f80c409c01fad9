//! `workflow-host`: the long-running Executor Host / Queue Consumer (C11).
//! Loads config the way `orchestrator-server` loads `ServerConfig` (TOML,
//! fall back to defaults and warn), optionally self-seeds one project and
//! its schedules for local/demo use, then runs the queue consumer loop
//! alongside a schedule-firing loop until Ctrl-C/SIGTERM.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use workflow_checkpoint::InMemoryRunStore;
use workflow_core::model::{ProjectDefinition, ProjectVersion, StepType};
use workflow_exec::cancel::CancelToken;
use workflow_host::assembly::HostCollaborators;
use workflow_host::registry::ProjectRegistry;
use workflow_host::runtime::{EchoLlmProvider, LocalCredentialSource, PassthroughCrypto, TemplateSandbox};
use workflow_host::{Consumer, HostConfig};
use workflow_triggers::{Ingress, Schedule};

#[derive(Parser)]
#[command(name = "workflow-host")]
#[command(about = "Executor host: claims and runs queued workflow runs", long_about = None)]
struct Args {
    /// Host tuning config (TOML). Defaults are used if absent.
    #[arg(long, default_value = "config/workflow-host.toml")]
    config: PathBuf,
    /// Optional project definition (JSON/YAML) to publish at startup, for
    /// local/demo deployments where nothing else populates the registry.
    #[arg(long)]
    seed_project: Option<PathBuf>,
    /// Tenant id to publish `seed_project` under; a fresh one is generated
    /// if omitted.
    #[arg(long)]
    tenant: Option<Uuid>,
    /// Project id to publish `seed_project` under; a fresh one is generated
    /// if omitted.
    #[arg(long)]
    project: Option<Uuid>,
    /// Optional schedules (JSON/YAML array) bound to `seed_project`, fired
    /// by this process's own schedule loop.
    #[arg(long)]
    seed_schedules: Option<PathBuf>,
}

fn load_yaml_or_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(serde_yaml::from_str(&raw)?)
    }
}

fn start_step_id(def: &ProjectDefinition) -> anyhow::Result<Uuid> {
    def.steps
        .iter()
        .find(|s| s.step_type == StepType::Start)
        .map(|s| s.id)
        .ok_or_else(|| anyhow::anyhow!("seed project has no start step"))
}

/// Polls every `schedules`'s `next_fire_after` and fires it through
/// `ingress` once due, tracking each schedule's last-fired instant in
/// memory.
async fn schedule_loop(
    ingress: Arc<Ingress>,
    registry: Arc<ProjectRegistry>,
    schedules: Vec<Schedule>,
    project_version: u32,
    shutdown: CancelToken,
) {
    if schedules.is_empty() {
        return;
    }
    let mut last_fired: HashMap<Uuid, chrono::DateTime<chrono::Utc>> = HashMap::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            _ = shutdown.cancelled() => break,
        }
        let now = chrono::Utc::now();
        for schedule in &schedules {
            if !schedule.active {
                continue;
            }
            let after = last_fired.get(&schedule.id).copied().unwrap_or(now - chrono::Duration::seconds(10));
            let due = match schedule.next_fire_after(after) {
                Ok(Some(next)) => next <= now,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "invalid schedule, skipping");
                    continue;
                }
            };
            if !due {
                continue;
            }
            let Some(version) = registry.definition(schedule.tenant_id, schedule.project_id) else {
                continue;
            };
            match ingress.fire_schedule(schedule, project_version, &version.definition).await {
                Ok(run_id) => tracing::info!(%run_id, schedule_id = %schedule.id, "schedule fired"),
                Err(e) => tracing::warn!(schedule_id = %schedule.id, error = %e, "schedule fire failed"),
            }
            last_fired.insert(schedule.id, now);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received CTRL-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    tracing::info!("loading host configuration");
    let config = HostConfig::load_or_default(&args.config);
    tracing::info!(
        worker_concurrency = config.worker_concurrency,
        per_tenant_concurrency = config.per_tenant_concurrency,
        "host configuration loaded"
    );

    let store = Arc::new(InMemoryRunStore::new());
    let registry = Arc::new(ProjectRegistry::new(store.clone()));
    let ingress = Arc::new(Ingress::new(store.clone()));

    let mut schedules = Vec::new();
    if let Some(project_path) = &args.seed_project {
        let def: ProjectDefinition = load_yaml_or_json(project_path)?;
        let start_id = start_step_id(&def)?;
        let tenant_id = args.tenant.unwrap_or_else(Uuid::new_v4);
        let project_id = args.project.unwrap_or_else(Uuid::new_v4);
        tracing::info!(%tenant_id, %project_id, "publishing seed project");
        registry
            .publish(
                ProjectVersion { tenant_id, project_id, version: 1, definition: def, published_at: chrono::Utc::now() },
                start_id,
            )
            .await?;

        if let Some(schedules_path) = &args.seed_schedules {
            let mut loaded: Vec<Schedule> = load_yaml_or_json(schedules_path)?;
            for schedule in &mut loaded {
                schedule.tenant_id = tenant_id;
                schedule.project_id = project_id;
            }
            tracing::info!(count = loaded.len(), "loaded seed schedules");
            schedules = loaded;
        }
    }

    let collaborators = HostCollaborators {
        store: store.clone(),
        credential_source: Arc::new(LocalCredentialSource::new()),
        crypto: Arc::new(PassthroughCrypto),
        prices: Arc::new(workflow_exec::usage::StaticPriceTable::with_default_pricing()),
        plans: registry.clone(),
        sandbox: Arc::new(TemplateSandbox),
        llm_provider: Arc::new(EchoLlmProvider),
        tool_adapters: HashMap::new(),
        approval_gate: Arc::new(workflow_exec::dispatch::ImmediateApproval),
    };

    let consumer = Consumer::new(store.clone(), registry.clone(), collaborators, config);
    let shutdown = CancelToken::new();

    let schedule_task = tokio::spawn(schedule_loop(ingress, registry, schedules, 1, shutdown.clone()));
    let consumer_task = tokio::spawn(consumer.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    let _ = tokio::join!(consumer_task, schedule_task);
    tracing::info!("workflow-host stopped");
    Ok(())
}
