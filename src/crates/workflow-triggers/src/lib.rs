//! `workflow-triggers`: Trigger Ingress (C10) — translates
//! external events (manual submission, schedule fire, webhook POST,
//! trusted internal/agent-chat calls) into run submissions bound to a
//! specific start step, after schema-validating and (webhooks) signature-
//! verifying the payload. `workflow-host` owns the schedule-firing loop and
//! the HTTP surface; this crate owns the translation logic alone.

pub mod error;
pub mod idempotency;
pub mod ingress;
pub mod schedule;
pub mod webhook;

pub use error::{Result, TriggerError};
pub use ingress::Ingress;
pub use schedule::Schedule;
