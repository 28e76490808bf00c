//! Completion rule for a story's task set.

use crate::core::types::{TaskState, TaskStatus};

/// True only when at least one task exists and every task is completed.
pub fn all_completed(tasks: &[TaskState]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|task| task.status == TaskStatus::Completed)
}

/// Ids of tasks not yet completed, in input order.
pub fn open_task_ids(tasks: &[TaskState]) -> Vec<&str> {
    tasks
        .iter()
        .filter(|task| task.status != TaskStatus::Completed)
        .map(|task| task.id.as_str())
        .collect()
}
