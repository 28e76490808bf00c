//! Shared deterministic types for the worker core.
//!
//! These types define stable contracts between the cycle controller, the
//! completion detector and the on-disk story format. They carry no I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a single task, as stored in its task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// A story task (`.saga/stories/<story-id>/<task-id>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub subject: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_when: Option<String>,
}

/// Minimal view of a task file used for completion polling.
///
/// Only `id` and `status` are required; the agent may rewrite other fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub status: TaskStatus,
}

/// Story metadata (`.saga/stories/<story-id>/story.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoid: Option<String>,
}

/// The subset of story metadata injected into the agent prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMeta {
    pub title: String,
    pub description: String,
    pub guidance: Option<String>,
    pub done_when: Option<String>,
    pub avoid: Option<String>,
}

impl From<&Story> for StoryMeta {
    fn from(story: &Story) -> Self {
        Self {
            title: story.title.clone(),
            description: story.description.clone(),
            guidance: non_empty(story.guidance.as_deref()),
            done_when: non_empty(story.done_when.as_deref()),
            avoid: non_empty(story.avoid.as_deref()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A task in the agent's native task-list format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTask {
    pub id: String,
    pub subject: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    pub status: TaskStatus,
    pub blocks: Vec<String>,
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// How a single agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    NonSuccess,
}

impl TerminalStatus {
    pub fn is_success(self) -> bool {
        self == TerminalStatus::Success
    }
}

/// Loop bookkeeping owned by the cycle controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopState {
    pub cycles_completed: u32,
    pub all_completed: bool,
}

/// Why the cycle loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStop {
    /// Every task file reported `completed` after a successful cycle.
    Completed,
    /// `max_cycles` invocations were consumed.
    CycleBudgetExhausted,
    /// The wall-clock budget elapsed before the next cycle could start.
    TimeBudgetExhausted,
    /// The caller cancelled the run; no further cycle was started.
    Cancelled,
}
