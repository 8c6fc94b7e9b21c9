use crate::pipeline::ExecutionMode;

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub index: usize,
    pub execution: ExecutionMode,
    pub duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks()
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }

    /// Names of the tasks that ran, in execution order.
    pub fn executed_tasks(&self) -> Vec<&str> {
        self.tasks().map(|task| task.name.as_str()).collect()
    }

    pub fn log_tasks(&self) {
        for task in self.tasks() {
            tracing::debug!(
                task = %task.name,
                duration_ms = task.duration_ms as u64,
                succeeded = task.succeeded,
                "Pipeline task timing"
            );
        }
        tracing::debug!(
            total_duration_ms = self.total_duration_ms as u64,
            "Pipeline finished"
        );
    }

    fn tasks(&self) -> impl Iterator<Item = &TaskMetrics> {
        self.stages.iter().flat_map(|stage| stage.tasks.iter())
    }
}
