//! `workflow` CLI: compile, validate, and run a project definition file
//! in-process, the single-shot counterpart to the long-running
//! `workflow-host` daemon. Modeled on the `langgraph-cli`
//! (`langgraph validate|check|run`), adapted to this engine's model.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;
use workflow_core::compiler::{self};
use workflow_core::model::ProjectDefinition;
use workflow_checkpoint::{InMemoryRunStore, RunStore};
use workflow_exec::cancel::CancelToken;
use workflow_exec::context::RunContext;
use workflow_host::assembly::{self, HostCollaborators};
use workflow_host::runtime::{EchoLlmProvider, LocalCredentialSource, PassthroughCrypto, TemplateSandbox};
use workflow_host::registry::ProjectRegistry;
use workflow_triggers::Ingress;

#[derive(Parser)]
#[command(name = "workflow")]
#[command(about = "Compile, validate, and run workflow project definitions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a project definition and report errors/warnings.
    Compile {
        /// Path to a JSON or YAML project definition.
        file: PathBuf,
        /// Start step id, required when the file declares more than one.
        #[arg(long)]
        start: Option<Uuid>,
    },
    /// Compile, submit a manual run, and execute it to completion in-process.
    Run {
        file: PathBuf,
        #[arg(long)]
        start: Option<Uuid>,
        /// Run input as a JSON literal.
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Run a project to completion, then resume it from `target` against a
    /// second, `parent_run_id`-linked run — a single-process demonstration
    /// of the resume path a long-running host picks up from its queue.
    Resume {
        file: PathBuf,
        #[arg(long)]
        start: Option<Uuid>,
        #[arg(long, default_value = "{}")]
        input: String,
        /// Step or block-group id to resume from.
        #[arg(long)]
        target: Uuid,
        /// Overrides `target`'s resolved input, as a JSON literal.
        #[arg(long)]
        input_override: Option<String>,
        /// Re-executes only `target` and stops, instead of continuing downstream.
        #[arg(long)]
        single_step: bool,
    },
}

fn load_definition(path: &PathBuf) -> anyhow::Result<ProjectDefinition> {
    let raw = std::fs::read_to_string(path)?;
    let def = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw)?
    } else {
        serde_yaml::from_str(&raw)?
    };
    Ok(def)
}

fn resolve_start(def: &ProjectDefinition, start: Option<Uuid>) -> anyhow::Result<Uuid> {
    if let Some(id) = start {
        return Ok(id);
    }
    let starts: Vec<_> = def
        .steps
        .iter()
        .filter(|s| s.step_type == workflow_core::model::StepType::Start)
        .collect();
    match starts.as_slice() {
        [one] => Ok(one.id),
        [] => anyhow::bail!("project has no start step"),
        _ => anyhow::bail!("project has multiple start steps; pass --start"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile { file, start } => {
            let def = load_definition(&file)?;
            let start_id = resolve_start(&def, start)?;
            match compiler::compile(&def, start_id) {
                Ok(plan) => {
                    println!("compiled ok: {} steps, {} groups, fingerprint {}", plan.nodes.len(), plan.groups.len(), plan.fingerprint);
                    for warning in &plan.warnings {
                        println!("warning: {warning:?}");
                    }
                }
                Err(e) => {
                    eprintln!("compile error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { file, start, input } => {
            let def = load_definition(&file)?;
            let start_id = resolve_start(&def, start)?;
            let input: serde_json::Value = serde_json::from_str(&input)?;

            let tenant_id = Uuid::new_v4();
            let project_id = Uuid::new_v4();
            let store = Arc::new(InMemoryRunStore::new());
            let registry = Arc::new(ProjectRegistry::new(store.clone()));
            let version = workflow_core::model::ProjectVersion {
                project_id,
                tenant_id,
                version: 1,
                definition: def.clone(),
                published_at: chrono::Utc::now(),
            };
            let plan = registry.publish(version, start_id).await?;

            let collaborators = HostCollaborators {
                store: store.clone(),
                credential_source: Arc::new(LocalCredentialSource::new()),
                crypto: Arc::new(PassthroughCrypto),
                prices: Arc::new(workflow_exec::usage::StaticPriceTable::with_default_pricing()),
                plans: registry.clone(),
                sandbox: Arc::new(TemplateSandbox),
                llm_provider: Arc::new(EchoLlmProvider),
                tool_adapters: std::collections::HashMap::new(),
                approval_gate: Arc::new(workflow_exec::dispatch::ImmediateApproval),
            };

            let ingress = Ingress::new(store.clone());
            let run_id = ingress
                .submit_manual(tenant_id, project_id, 1, &def, Some(start_id), input, None)
                .await?;
            let claimed = store
                .claim_pending(3600)
                .await?
                .ok_or_else(|| anyhow::anyhow!("submitted run {run_id} was not claimable"))?;

            let scheduler = assembly::build_scheduler(plan, &collaborators);
            let ctx = RunContext::new(
                claimed.run.id,
                tenant_id,
                start_id,
                claimed.run.input.clone(),
                def.variables.clone(),
                std::collections::HashMap::new(),
                std::collections::HashMap::new(),
            );
            let outcome = scheduler.run(ctx, &CancelToken::new()).await;
            println!("status: {:?}", outcome.status);
            println!("output: {}", serde_json::to_string_pretty(&outcome.output)?);
            if let Some(error) = outcome.error {
                eprintln!("error: {error}");
                std::process::exit(1);
            }
        }
        Commands::Resume { file, start, input, target, input_override, single_step } => {
            let def = load_definition(&file)?;
            let start_id = resolve_start(&def, start)?;
            let input: serde_json::Value = serde_json::from_str(&input)?;
            let input_override: Option<serde_json::Value> = input_override.map(|raw| serde_json::from_str(&raw)).transpose()?;

            let tenant_id = Uuid::new_v4();
            let project_id = Uuid::new_v4();
            let store = Arc::new(InMemoryRunStore::new());
            let registry = Arc::new(ProjectRegistry::new(store.clone()));
            let version = workflow_core::model::ProjectVersion {
                project_id,
                tenant_id,
                version: 1,
                definition: def.clone(),
                published_at: chrono::Utc::now(),
            };
            let plan = registry.publish(version, start_id).await?;
            let collaborators = HostCollaborators {
                store: store.clone(),
                credential_source: Arc::new(LocalCredentialSource::new()),
                crypto: Arc::new(PassthroughCrypto),
                prices: Arc::new(workflow_exec::usage::StaticPriceTable::with_default_pricing()),
                plans: registry.clone(),
                sandbox: Arc::new(TemplateSandbox),
                llm_provider: Arc::new(EchoLlmProvider),
                tool_adapters: std::collections::HashMap::new(),
                approval_gate: Arc::new(workflow_exec::dispatch::ImmediateApproval),
            };
            let scheduler = assembly::build_scheduler(plan, &collaborators);
            let ingress = Ingress::new(store.clone());

            let source_run_id = ingress
                .submit_manual(tenant_id, project_id, 1, &def, Some(start_id), input, None)
                .await?;
            let source_claim = store
                .claim_pending(3600)
                .await?
                .ok_or_else(|| anyhow::anyhow!("submitted run {source_run_id} was not claimable"))?;
            let source_ctx = RunContext::new(
                source_claim.run.id,
                tenant_id,
                start_id,
                source_claim.run.input.clone(),
                def.variables.clone(),
                std::collections::HashMap::new(),
                std::collections::HashMap::new(),
            );
            let source_outcome = scheduler.run(source_ctx, &CancelToken::new()).await;
            println!("source run status: {:?}", source_outcome.status);

            let resume_run_id = ingress
                .submit_resume(tenant_id, project_id, 1, &def, source_run_id, target, input_override, single_step)
                .await?;
            let resume_claim = store
                .claim_pending(3600)
                .await?
                .ok_or_else(|| anyhow::anyhow!("submitted resume {resume_run_id} was not claimable"))?;

            let outcome = if single_step {
                scheduler
                    .execute_single_step(
                        resume_claim.run.id,
                        tenant_id,
                        source_run_id,
                        target,
                        resume_claim.run.trigger_metadata.get("input_override").cloned().filter(|v| !v.is_null()),
                        def.variables.clone(),
                        std::collections::HashMap::new(),
                        std::collections::HashMap::new(),
                        &CancelToken::new(),
                    )
                    .await?
            } else {
                scheduler
                    .resume(
                        resume_claim.run.id,
                        tenant_id,
                        source_run_id,
                        target,
                        resume_claim.run.trigger_metadata.get("input_override").cloned().filter(|v| !v.is_null()),
                        def.variables.clone(),
                        std::collections::HashMap::new(),
                        std::collections::HashMap::new(),
                        &CancelToken::new(),
                    )
                    .await?
            };
            println!("resume status: {:?}", outcome.status);
            println!("resume output: {}", serde_json::to_string_pretty(&outcome.output)?);
            if let Some(error) = outcome.error {
                eprintln!("error: {error}");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
