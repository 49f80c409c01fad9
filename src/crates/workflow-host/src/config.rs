//! Executor host tuning knobs. Loaded
//! from a TOML file the way the `orchestrator::config::ServerConfig`
//! is, with the same fall-back-to-defaults-and-warn posture rather than a
//! hard failure on every field.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Host-wide concurrency and lease tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Max runs this host executes concurrently, across all tenants.
    pub worker_concurrency: usize,
    /// Max runs any single tenant may occupy concurrently on this host.
    pub per_tenant_concurrency: usize,
    /// Lease duration handed to [`workflow_checkpoint::RunStore::claim_pending`].
    pub lease_duration_secs: u64,
    /// How often a held lease is renewed; must be well under
    /// `lease_duration_secs` to tolerate a missed beat.
    pub heartbeat_interval_secs: u64,
    /// Poll interval when the queue is empty.
    pub poll_interval_ms: u64,
    /// Grace period after a shutdown signal before in-flight runs are
    /// cooperatively cancelled.
    pub shutdown_grace_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 8,
            per_tenant_concurrency: 2,
            lease_duration_secs: 30,
            heartbeat_interval_secs: 10,
            poll_interval_ms: 500,
            shutdown_grace_secs: 30,
        }
    }
}

impl HostConfig {
    /// Loads from a TOML file at `path`, falling back to defaults (and
    /// logging a warning) when it's absent or unreadable, mirroring the
    /// teacher's `ServerConfig::load` posture.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse host config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "no host config found, using defaults");
                Self::default()
            }
        }
    }
}
