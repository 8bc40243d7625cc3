//! Case execution engine
//!
//! Provides the worker pool and the orchestrator that wraps a run in the
//! database lifecycle.

mod orchestrator;
mod pool;

pub use orchestrator::{Orchestrator, RunOptions};
pub use pool::{DispatchError, WorkerPool};
