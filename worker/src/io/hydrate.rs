//! Hydrate a story's task files into the agent's native task list.
//!
//! Story and task files are schema-validated (Draft 2020-12), converted with
//! `blocks` computed from `blockedBy`, and written as
//! `<tasks_root>/<task-list-id>/<task-id>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::convert::to_native_tasks;
use crate::core::ids::task_list_id;
use crate::core::types::{Story, StoryMeta, Task};
use crate::io::paths::StoryPaths;
use crate::io::story::{read_json, task_files, write_json};

const STORY_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/story/v1.schema.json"
));
const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/task/v1.schema.json"
));

/// Outcome of a hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct Hydration {
    pub task_list_id: String,
    pub task_list_dir: PathBuf,
    pub task_count: usize,
    pub story_meta: StoryMeta,
}

/// Validate, convert and write the story's tasks under `tasks_root`.
#[instrument(skip_all, fields(story_id = %story.story_id))]
pub fn hydrate_tasks(story: &StoryPaths, tasks_root: &Path, unix_millis: i64) -> Result<Hydration> {
    if !story.story_json.exists() {
        bail!("story.json not found at {}", story.story_json.display());
    }
    let story_raw: Value = read_json(&story.story_json)?;
    validate_schema(&story_raw, STORY_SCHEMA)
        .with_context(|| format!("validate {}", story.story_json.display()))?;
    let meta: Story = serde_json::from_value(story_raw)
        .with_context(|| format!("parse {}", story.story_json.display()))?;

    let mut tasks: Vec<Task> = Vec::new();
    for path in task_files(&story.dir)? {
        let raw: Value = read_json(&path)?;
        validate_schema(&raw, TASK_SCHEMA).with_context(|| format!("validate {}", path.display()))?;
        let task: Task =
            serde_json::from_value(raw).with_context(|| format!("parse {}", path.display()))?;
        tasks.push(task);
    }
    debug!(tasks = tasks.len(), "loaded story tasks");

    let list_id = task_list_id(&story.story_id, unix_millis);
    let list_dir = tasks_root.join(&list_id);
    fs::create_dir_all(&list_dir)
        .with_context(|| format!("create task list dir {}", list_dir.display()))?;
    for native in to_native_tasks(&tasks) {
        write_json(&list_dir.join(format!("{}.json", native.id)), &native)?;
    }

    info!(task_list_id = %list_id, count = tasks.len(), "tasks hydrated");
    Ok(Hydration {
        task_list_id: list_id,
        task_list_dir: list_dir,
        task_count: tasks.len(),
        story_meta: StoryMeta::from(&meta),
    })
}

/// Validate a JSON instance against an embedded JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
