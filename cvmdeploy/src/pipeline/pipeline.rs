//! Generic pipeline execution framework.
//!
//! Provides a table-driven pipeline executor that runs stages of tasks in
//! order, stops at the first failure, and still runs cleanup stages.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use cvmdeploy_shared::errors::DeployError;
use std::fmt;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }
}

pub struct Pipeline<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(plan.stages())
    }
}

/// The first task failure of a pipeline run.
#[derive(Debug)]
pub struct PipelineFailure {
    /// Name of the task that failed first.
    pub task: String,
    pub error: DeployError,
    /// Timings of every task that ran, including cleanup.
    pub metrics: PipelineMetrics,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} failed: {}", self.task, self.error)
    }
}

/// Pipeline executor framework.
///
/// This provides the generic infrastructure for executing a table-driven pipeline.
/// The actual task execution logic is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// Stages run in order. After the first task failure, sequential stages
    /// are skipped and cleanup stages still run. The first failure is
    /// returned; cleanup failures that follow it are logged.
    ///
    /// Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(
        pipeline: Pipeline<Ctx>,
        ctx: Ctx,
    ) -> Result<PipelineMetrics, PipelineFailure>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();
        let mut failure: Option<(String, DeployError)> = None;

        for (index, stage) in pipeline.stages.into_iter().enumerate() {
            let execution = stage.execution;
            if failure.is_some() && execution == ExecutionMode::Sequential {
                continue;
            }

            let stage_start = Instant::now();
            let mut task_metrics = Vec::new();

            for task in stage.tasks {
                let name = task.name().to_string();
                let task_start = Instant::now();
                let result = task.run(ctx.clone()).await;
                task_metrics.push(TaskMetrics {
                    name: name.clone(),
                    duration_ms: task_start.elapsed().as_millis(),
                    succeeded: result.is_ok(),
                });

                let Err(error) = result else {
                    continue;
                };
                match &failure {
                    None => failure = Some((name, error)),
                    Some((first, _)) => tracing::error!(
                        task = %name,
                        first_failure = %first,
                        error = %error,
                        "Cleanup task failed after an earlier failure"
                    ),
                }
                if execution == ExecutionMode::Sequential {
                    break;
                }
            }

            stage_metrics.push(StageMetrics {
                index,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        let metrics = PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        };

        match failure {
            None => Ok(metrics),
            Some((task, error)) => Err(PipelineFailure {
                task,
                error,
                metrics,
            }),
        }
    }
}
