//! Story execution pipeline.
//!
//! Linear: provision the worktree, open a draft PR, hydrate the story's tasks
//! into the agent's task list, render the prompt, run the cycle loop, then
//! mark the PR ready when every task completed. Progress goes to the event
//! sink; the caller gets a [`StatusSummary`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::budget::{CycleBudget, elapsed_minutes};
use crate::core::ids::is_valid_story_id;
use crate::cycle::{LoopConfig, LoopOutcome, run_cycles};
use crate::exit_codes;
use crate::io::agent::{AgentInvoker, CancelToken};
use crate::io::config::{ConfigError, WorkerConfig};
use crate::io::events::{EventSink, WorkerEvent};
use crate::io::hydrate::hydrate_tasks;
use crate::io::paths::StoryPaths;
use crate::io::pr::{PullRequests, mark_ready_if_completed};
use crate::io::prompt::build_prompt;
use crate::io::story::write_json;
use crate::io::worktree::setup_worktree;

/// Inputs resolved by the CLI before the pipeline starts.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub story_id: String,
    pub project_root: PathBuf,
    pub config: WorkerConfig,
    /// Where to write the summary as pretty JSON, if anywhere.
    pub output_file: Option<PathBuf>,
}

/// External collaborators for one run.
pub struct Collaborators<'a> {
    pub invoker: &'a dyn AgentInvoker,
    pub prs: &'a dyn PullRequests,
    pub sink: &'a dyn EventSink,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Incomplete,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

/// Terminal summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub status: RunStatus,
    pub all_completed: bool,
    pub exit_code: i32,
    pub cycles: u32,
    pub elapsed_minutes: u64,
}

impl StatusSummary {
    pub fn from_outcome(outcome: &LoopOutcome) -> Self {
        let (status, exit_code) = if outcome.all_completed {
            (RunStatus::Completed, exit_codes::OK)
        } else {
            (RunStatus::Incomplete, exit_codes::INCOMPLETE)
        };
        Self {
            status,
            all_completed: outcome.all_completed,
            exit_code,
            cycles: outcome.cycles_completed,
            elapsed_minutes: elapsed_minutes(outcome.elapsed),
        }
    }

    /// Single-line JSON rendering for stdout.
    pub fn line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Run the pipeline for one story.
///
/// Fatal errors (bad story id, missing project, provisioning, PR creation,
/// hydration, loop preconditions) are returned; a `pipeline_end` record with
/// status `error` is still emitted.
#[instrument(skip_all, fields(story_id = %opts.story_id))]
pub fn run_pipeline(opts: &PipelineOptions, collab: &Collaborators<'_>) -> Result<StatusSummary> {
    check_inputs(opts)?;
    collab.sink.emit(&WorkerEvent::PipelineStart {
        story_id: opts.story_id.clone(),
    });

    match execute(opts, collab) {
        Ok(summary) => {
            collab.sink.emit(&WorkerEvent::PipelineEnd {
                story_id: opts.story_id.clone(),
                status: summary.status.as_str().to_string(),
                exit_code: summary.exit_code,
                cycles: summary.cycles,
                elapsed_minutes: summary.elapsed_minutes,
            });
            if let Some(path) = &opts.output_file {
                write_summary(path, &summary)?;
            }
            info!(status = summary.status.as_str(), cycles = summary.cycles, "pipeline finished");
            Ok(summary)
        }
        Err(err) => {
            collab.sink.emit(&WorkerEvent::PipelineEnd {
                story_id: opts.story_id.clone(),
                status: "error".to_string(),
                exit_code: exit_codes::ERROR,
                cycles: 0,
                elapsed_minutes: 0,
            });
            Err(err)
        }
    }
}

fn execute(opts: &PipelineOptions, collab: &Collaborators<'_>) -> Result<StatusSummary> {
    let story_id = opts.story_id.as_str();
    let step = |n: u32, message: String| {
        info!(step = n, "{message}");
        collab.sink.emit(&WorkerEvent::PipelineStep { step: n, message });
    };

    step(1, format!("Setting up worktree for {story_id}"));
    let worktree = setup_worktree(story_id, &opts.project_root)?;

    step(2, format!("Creating draft PR for {}", worktree.branch));
    let pr = collab
        .prs
        .create_draft(story_id, &worktree.path)
        .context("create draft PR")?;
    info!(number = pr.number, url = %pr.url, "draft PR ready");

    let story = StoryPaths::new(&worktree.path, story_id);
    let tasks_root = opts.config.resolved_tasks_dir()?;
    step(3, format!("Hydrating tasks into {}", tasks_root.display()));
    let hydration = hydrate_tasks(&story, &tasks_root, Utc::now().timestamp_millis())?;

    step(4, "Building prompt".to_string());
    let prompt = build_prompt(&hydration.story_meta, story_id)?;

    step(
        5,
        format!(
            "Running up to {} cycles with {}",
            opts.config.max_cycles, opts.config.model
        ),
    );
    let loop_config = LoopConfig {
        story_id: story_id.to_string(),
        worktree: worktree.path.clone(),
        story_dir: story.dir.clone(),
        task_list_id: hydration.task_list_id,
        prompt,
        model: opts.config.model.clone(),
        budget: CycleBudget {
            max_cycles: opts.config.max_cycles,
            max_elapsed: Duration::from_secs(opts.config.max_time_minutes.saturating_mul(60)),
        },
        cycle_timeout: opts
            .config
            .cycle_timeout_minutes
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60))),
    };
    let outcome = run_cycles(&loop_config, collab.invoker, collab.sink, collab.cancel)?;

    step(6, "Finalizing PR".to_string());
    let marked = mark_ready_if_completed(collab.prs, story_id, &worktree.path, outcome.all_completed);
    info!(marked, "PR finalized");

    Ok(StatusSummary::from_outcome(&outcome))
}

fn check_inputs(opts: &PipelineOptions) -> Result<()> {
    if !is_valid_story_id(&opts.story_id) {
        return Err(ConfigError::new(format!(
            "invalid story id '{}' (expected [a-z0-9-]+)",
            opts.story_id
        ))
        .into());
    }
    if !opts.project_root.is_dir() {
        return Err(ConfigError::new(format!(
            "project directory {} does not exist",
            opts.project_root.display()
        ))
        .into());
    }
    opts.config.validate()
}

fn write_summary(path: &Path, summary: &StatusSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    write_json(path, summary)
}
