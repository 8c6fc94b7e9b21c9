//! Generic table-driven pipeline execution framework.
//!
//! This module provides a reusable pipeline infrastructure that supports:
//! - Table-driven execution plans
//! - Sequential stages that stop at the first failure
//! - Cleanup stages that run even after an earlier stage failed
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages → Tasks
//!
//! - Pipeline: Orchestrates execution of all stages
//! - Stage: Groups related tasks with an execution mode (sequential/cleanup)
//! - Task: Atomic unit of work
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, PipelineBuilder, PipelineExecutor, Stage};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let plan = ExecutionPlan::new(vec![
//!     Stage::sequential(vec![Box::new(Acquire), Box::new(Use)]),
//!     Stage::cleanup(vec![Box::new(Release)]),
//! ]);
//!
//! let ctx = Arc::new(Mutex::new(Context::default()));
//! let pipeline = PipelineBuilder::from_plan(plan);
//! match PipelineExecutor::execute(pipeline, ctx).await {
//!     Ok(metrics) => println!("pipeline took {}ms", metrics.total_duration_ms),
//!     Err(failure) => println!("{} failed: {}", failure.task, failure.error),
//! }
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineExecutor, PipelineFailure};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
