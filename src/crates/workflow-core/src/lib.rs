//! Expression/template evaluation, the graph compiler, and the shared data
//! model for the DAG execution engine.
//!
//! This crate has no knowledge of how steps actually execute (that's
//! `workflow-exec`) or how runs are persisted (`workflow-checkpoint`); it is
//! the pure, synchronous foundation both build on, in the same spirit as
//! `langgraph_core`'s graph/state/error modules sitting underneath its
//! pregel executor.

pub mod compiler;
pub mod error;
pub mod expr;
pub mod model;

pub use error::{EngineError, ErrorKind, Result};
