//! Publishes project versions and keeps their compiled [`ExecutionPlan`]s
//! warm in memory, so the scheduler never recompiles on the hot path. Doubles as the
//! [`PlanLoader`] a `subflow` step's [`workflow_exec::scheduler::Scheduler`]
//! calls back into — the same collaborator, consulted two ways.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use workflow_core::compiler::{self, ExecutionPlan};
use workflow_core::model::ProjectVersion;
use workflow_checkpoint::RunStore;
use workflow_exec::scheduler::PlanLoader;

use crate::error::Result;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
struct PlanKey {
    tenant_id: Uuid,
    project_id: Uuid,
}

/// One registered project: its published definition (for ingress/compile
/// commands) plus the plan the scheduler drives (for every run of it).
struct RegisteredProject {
    version: ProjectVersion,
    plan: Arc<ExecutionPlan>,
}

/// Holds the current published version and compiled plan of every project
/// the host has seen, and persists each publish through [`RunStore`] so a
/// restarted host can rebuild its cache from [`RunStore::get_project_version`].
pub struct ProjectRegistry {
    store: Arc<dyn RunStore>,
    projects: RwLock<HashMap<PlanKey, RegisteredProject>>,
}

impl ProjectRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Compiles `version.definition` against `start_step_id`, persists the
    /// snapshot, and caches the plan for future runs and `subflow` lookups.
    pub async fn publish(&self, version: ProjectVersion, start_step_id: Uuid) -> Result<Arc<ExecutionPlan>> {
        let plan = Arc::new(compiler::compile(&version.definition, start_step_id)?);
        let key = PlanKey {
            tenant_id: version.tenant_id,
            project_id: version.project_id,
        };
        self.store.put_project_version(version.clone()).await?;
        self.projects.write().unwrap().insert(
            key,
            RegisteredProject {
                version,
                plan: Arc::clone(&plan),
            },
        );
        Ok(plan)
    }

    #[must_use]
    pub fn definition(&self, tenant_id: Uuid, project_id: Uuid) -> Option<ProjectVersion> {
        let key = PlanKey { tenant_id, project_id };
        self.projects.read().unwrap().get(&key).map(|p| p.version.clone())
    }

    #[must_use]
    pub fn plan(&self, tenant_id: Uuid, project_id: Uuid) -> Option<Arc<ExecutionPlan>> {
        let key = PlanKey { tenant_id, project_id };
        self.projects.read().unwrap().get(&key).map(|p| Arc::clone(&p.plan))
    }
}

#[async_trait::async_trait]
impl PlanLoader for ProjectRegistry {
    async fn load_plan(&self, tenant_id: Uuid, project_id: Uuid) -> workflow_core::error::Result<Arc<ExecutionPlan>> {
        self.plan(tenant_id, project_id).ok_or_else(|| {
            workflow_core::error::EngineError::permanent(format!("no published plan for project {project_id} (tenant {tenant_id})"))
        })
    }
}
