//! Stage definition for table-driven pipeline execution.

/// Execution mode for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute tasks one after another; skipped once any earlier task failed.
    Sequential,
    /// Execute tasks one after another, even after an earlier failure.
    ///
    /// Every task in a cleanup stage runs; a failure does not stop the
    /// remaining cleanup tasks.
    Cleanup,
}

/// A stage contains multiple tasks and an execution mode.
///
/// Stages are executed in order, and each stage's tasks are executed
/// according to the stage's execution mode.
///
/// Generic over task type T to allow different pipeline implementations.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
}

impl<T> Stage<T> {
    /// Create a stage with sequential task execution.
    pub fn sequential(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Sequential,
        }
    }

    /// Create a stage that runs regardless of earlier failures.
    pub fn cleanup(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Cleanup,
        }
    }
}
