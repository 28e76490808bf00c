//! Conversion of story tasks into the agent's native task-list format.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::types::{NativeTask, Task};

/// Convert every task, computing `blocks` as the inverse of `blockedBy`.
///
/// Output order matches input order.
pub fn to_native_tasks(tasks: &[Task]) -> Vec<NativeTask> {
    tasks.iter().map(|task| to_native(task, tasks)).collect()
}

/// Convert one task against the full set it belongs to.
pub fn to_native(task: &Task, all: &[Task]) -> NativeTask {
    let blocks = all
        .iter()
        .filter(|other| other.blocked_by.iter().any(|id| *id == task.id))
        .map(|other| other.id.clone())
        .collect();

    let mut metadata = BTreeMap::new();
    if let Some(guidance) = &task.guidance {
        metadata.insert("guidance".to_string(), Value::String(guidance.clone()));
    }
    if let Some(done_when) = &task.done_when {
        metadata.insert("doneWhen".to_string(), Value::String(done_when.clone()));
    }

    NativeTask {
        id: task.id.clone(),
        subject: task.subject.clone(),
        description: task.description.clone(),
        active_form: task.active_form.clone(),
        status: task.status,
        blocks,
        blocked_by: task.blocked_by.clone(),
        metadata: (!metadata.is_empty()).then_some(metadata),
    }
}
