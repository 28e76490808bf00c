//! Story directory access: task files, status sync and completion polling.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::completion::{all_completed, open_task_ids};
use crate::core::types::{TaskState, TaskStatus};
use crate::io::paths::{STORY_FILE, StoryPaths};

/// Task files in `story_dir`: every `*.json` except the story metadata file,
/// sorted by file name.
pub fn task_files(story_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(story_dir).with_context(|| format!("read dir {}", story_dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry {}", story_dir.display()))?;
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let is_story = path.file_name().is_some_and(|name| name == STORY_FILE);
        if is_json && !is_story && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Decide whether every task in `story_dir` is completed.
///
/// Zero task files yields `false`. A task file that cannot be read or parsed
/// is an error; the cycle controller treats that as "not confirmed".
#[instrument(skip_all, fields(story_dir = %story_dir.display()))]
pub fn all_tasks_completed(story_dir: &Path) -> Result<bool> {
    let files = task_files(story_dir)?;
    if files.is_empty() {
        debug!("no task files");
        return Ok(false);
    }
    let mut states = Vec::with_capacity(files.len());
    for path in &files {
        let state: TaskState = read_json(path)?;
        if state.status != TaskStatus::Completed {
            debug!(task = %state.id, status = state.status.as_str(), "task still open");
            return Ok(false);
        }
        states.push(state);
    }
    let done = all_completed(&states);
    debug!(done, open = ?open_task_ids(&states), "completion check");
    Ok(done)
}

/// Write `status` into the task file for `task_id`, leaving other fields as
/// the file has them.
#[instrument(skip_all, fields(task_id, status = status.as_str()))]
pub fn write_task_status(paths: &StoryPaths, task_id: &str, status: TaskStatus) -> Result<()> {
    let path = paths.task_file(task_id);
    let mut raw: Value = read_json(&path)?;
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| anyhow!("task file {} is not an object", path.display()))?;
    obj.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    write_json(&path, &raw)?;
    debug!("task status synced");
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub(crate) fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Task;
    use crate::test_support::TestStory;

    #[test]
    fn zero_task_files_is_not_complete() {
        let story = TestStory::new("auth").expect("story");
        assert!(!all_tasks_completed(&story.paths().dir).expect("check"));
    }

    #[test]
    fn story_json_and_journal_are_not_tasks() {
        let story = TestStory::new("auth").expect("story");
        story.write_journal("notes").expect("journal");
        story.add_task("t1", TaskStatus::Pending).expect("task");
        let files = task_files(&story.paths().dir).expect("files");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("t1.json"));
    }

    #[test]
    fn completion_requires_every_task() {
        let story = TestStory::new("auth").expect("story");
        story.add_task("t1", TaskStatus::Completed).expect("task");
        story.add_task("t2", TaskStatus::InProgress).expect("task");
        assert!(!all_tasks_completed(&story.paths().dir).expect("check"));

        story.set_status("t2", TaskStatus::Completed).expect("status");
        assert!(all_tasks_completed(&story.paths().dir).expect("check"));
    }

    #[test]
    fn malformed_task_is_an_error() {
        let story = TestStory::new("auth").expect("story");
        fs::write(story.paths().task_file("bad"), "{not json").expect("write");
        assert!(all_tasks_completed(&story.paths().dir).is_err());

        fs::write(
            story.paths().task_file("bad"),
            r#"{"id":"bad","status":"done"}"#,
        )
        .expect("write");
        assert!(all_tasks_completed(&story.paths().dir).is_err());
    }

    #[test]
    fn write_task_status_preserves_other_fields() {
        let story = TestStory::new("auth").expect("story");
        story.add_task("t1", TaskStatus::Pending).expect("task");
        write_task_status(story.paths(), "t1", TaskStatus::InProgress).expect("sync");

        let task: Task = read_json(&story.paths().task_file("t1")).expect("load");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.subject, "Task t1");
    }

    #[test]
    fn write_task_status_errors_for_unknown_task() {
        let story = TestStory::new("auth").expect("story");
        assert!(write_task_status(story.paths(), "missing", TaskStatus::Completed).is_err());
    }
}
