//! `workflow-host`: the Executor Host / Queue Consumer (C11)
//! plus the local reference collaborators a single-process deployment
//! plugs into the engine (`workflow-exec`) and ingress (`workflow-triggers`)
//! crates. Ships two binaries: `workflow-host` (the long-running consumer)
//! and `workflow` (a CLI for compiling, submitting, and inspecting runs),
//! mirroring the split between `orchestrator-server` and `orca`.

pub mod assembly;
pub mod config;
pub mod consumer;
pub mod error;
pub mod registry;
pub mod runtime;

pub use config::HostConfig;
pub use consumer::Consumer;
pub use registry::ProjectRegistry;
