//! Test-only helpers: temp stories and repos, scripted agents and sinks.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::{TaskStatus, TerminalStatus};
use crate::io::agent::{AgentInvoker, AgentRequest, CancelToken};
use crate::io::events::EventSink;
use crate::io::paths::StoryPaths;
use crate::io::story::write_task_status;

/// A story directory under a temp root (`<root>/.saga/stories/<id>`).
pub struct TestStory {
    temp: TempDir,
    paths: StoryPaths,
}

impl TestStory {
    pub fn new(story_id: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let paths = StoryPaths::new(temp.path(), story_id);
        write_story_files(&paths, story_id)?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn story_id(&self) -> &str {
        &self.paths.story_id
    }

    pub fn paths(&self) -> &StoryPaths {
        &self.paths
    }

    pub fn add_task(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.add_task_blocked_by(task_id, status, &[])
    }

    pub fn add_task_blocked_by(
        &self,
        task_id: &str,
        status: TaskStatus,
        blocked_by: &[&str],
    ) -> Result<()> {
        write_task_file(&self.paths, task_id, status, blocked_by)
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        write_task_status(&self.paths, task_id, status)
    }

    pub fn write_journal(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.journal_md, contents)
            .with_context(|| format!("write {}", self.paths.journal_md.display()))
    }
}

/// Write `story.json` for `story_id` under `paths`.
pub fn write_story_files(paths: &StoryPaths, story_id: &str) -> Result<()> {
    fs::create_dir_all(&paths.dir).with_context(|| format!("create {}", paths.dir.display()))?;
    let story = json!({
        "id": story_id,
        "title": format!("Story {story_id}"),
        "description": format!("Description for {story_id}"),
        "doneWhen": "all tasks pass",
    });
    write_pretty(&paths.story_json, &story)
}

/// Write a schema-valid task file.
pub fn write_task_file(
    paths: &StoryPaths,
    task_id: &str,
    status: TaskStatus,
    blocked_by: &[&str],
) -> Result<()> {
    let task = json!({
        "id": task_id,
        "subject": format!("Task {task_id}"),
        "description": format!("Description for {task_id}"),
        "status": status.as_str(),
        "blockedBy": blocked_by,
    });
    write_pretty(&paths.task_file(task_id), &task)
}

fn write_pretty(path: &Path, value: &Value) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// A git repository in a temp dir with one commit on `main`.
pub struct TestRepo {
    temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path().join("project");
        fs::create_dir_all(&root).context("create project dir")?;
        git(&root, &["init", "-q"])?;
        git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git(&root, &["config", "user.name", "Saga Test"])?;
        git(&root, &["config", "user.email", "saga@example.test"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "# test\n").context("write README")?;
        git(&root, &["add", "-A"])?;
        git(&root, &["commit", "-q", "-m", "init"])?;
        Ok(Self { temp, root })
    }

    /// Like [`TestRepo::new`], plus a bare `origin` holding `main` with
    /// `origin/HEAD` set.
    pub fn with_origin() -> Result<Self> {
        let repo = Self::new()?;
        let origin = repo.temp.path().join("origin.git");
        let origin_arg = origin.to_string_lossy().into_owned();
        git(repo.temp.path(), &["init", "-q", "--bare", &origin_arg])?;
        git(&repo.root, &["remote", "add", "origin", &origin_arg])?;
        git(&repo.root, &["push", "-q", "-u", "origin", "main"])?;
        git(&repo.root, &["remote", "set-head", "origin", "main"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Add a story with tasks and commit it to `main` (and push when an
    /// origin exists), so new worktrees see it.
    pub fn commit_story(&self, story_id: &str, tasks: &[(&str, TaskStatus)]) -> Result<()> {
        let paths = StoryPaths::new(&self.root, story_id);
        write_story_files(&paths, story_id)?;
        for (task_id, status) in tasks {
            write_task_file(&paths, task_id, *status, &[])?;
        }
        git(&self.root, &["add", "-A"])?;
        git(&self.root, &["commit", "-q", "-m", "add story"])?;
        let has_origin = Command::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(&self.root)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false);
        if has_origin {
            git(&self.root, &["push", "-q", "origin", "main"])?;
        }
        Ok(())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Write an executable `sh` script with `body` into `dir` and return its path.
#[cfg(unix)]
pub fn script_command(dir: &Path, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let n = SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = dir.join(format!("script-{n}.sh"));
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Value>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn write(&self, record: &Value) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// One scripted agent invocation.
#[derive(Debug, Clone)]
pub struct ScriptedCycle {
    /// `Err` simulates a launch/transport failure.
    pub result: std::result::Result<TerminalStatus, String>,
    /// Task ids the "agent" rewrites as completed during the cycle.
    pub complete: Vec<String>,
    /// Task id whose file the "agent" corrupts during the cycle.
    pub corrupt: Option<String>,
    pub duration: Duration,
}

impl ScriptedCycle {
    pub fn success() -> Self {
        Self::with_result(Ok(TerminalStatus::Success))
    }

    pub fn non_success() -> Self {
        Self::with_result(Ok(TerminalStatus::NonSuccess))
    }

    pub fn launch_error() -> Self {
        Self::with_result(Err("spawn agent: No such file or directory".to_string()))
    }

    fn with_result(result: std::result::Result<TerminalStatus, String>) -> Self {
        Self {
            result,
            complete: Vec::new(),
            corrupt: None,
            duration: Duration::ZERO,
        }
    }

    pub fn completing(mut self, task_ids: &[&str]) -> Self {
        self.complete = task_ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn corrupting(mut self, task_id: &str) -> Self {
        self.corrupt = Some(task_id.to_string());
        self
    }

    pub fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Agent invoker replaying queued cycles against the story directory under
/// the request's working directory.
#[derive(Debug)]
pub struct ScriptedInvoker {
    queue: Mutex<VecDeque<ScriptedCycle>>,
    repeat: Option<ScriptedCycle>,
    calls: AtomicU32,
    cancel_after_first: Option<CancelToken>,
}

impl ScriptedInvoker {
    pub fn new(cycles: Vec<ScriptedCycle>) -> Self {
        Self {
            queue: Mutex::new(cycles.into()),
            repeat: None,
            calls: AtomicU32::new(0),
            cancel_after_first: None,
        }
    }

    /// Replay the same cycle forever.
    pub fn repeating(cycle: ScriptedCycle) -> Self {
        Self {
            repeat: Some(cycle),
            ..Self::new(Vec::new())
        }
    }

    /// Cancel `token` once the first invocation finishes.
    pub fn cancelling(mut self, token: &CancelToken) -> Self {
        self.cancel_after_first = Some(token.clone());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_cycle(&self) -> Result<ScriptedCycle> {
        let queued = self
            .queue
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front();
        queued
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| anyhow!("scripted invoker exhausted"))
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(
        &self,
        request: &AgentRequest,
        sink: &dyn EventSink,
        _cancel: &CancelToken,
    ) -> Result<TerminalStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let cycle = self.next_cycle()?;
        if !cycle.duration.is_zero() {
            std::thread::sleep(cycle.duration);
        }

        let story = StoryPaths::new(&request.workdir, &request.hooks.scope.story_id);
        for task_id in &cycle.complete {
            write_task_file(&story, task_id, TaskStatus::Completed, &[])?;
        }
        if let Some(task_id) = &cycle.corrupt {
            fs::write(story.task_file(task_id), "{not json")?;
        }
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }

        let status = cycle.result.map_err(|msg| anyhow!(msg))?;
        let subtype = if status.is_success() {
            "success"
        } else {
            "error_during_execution"
        };
        sink.write(&json!({"type": "result", "subtype": subtype}));
        Ok(status)
    }
}
