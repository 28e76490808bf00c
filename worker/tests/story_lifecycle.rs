//! End-to-end story runs through the library API.
//!
//! A real git repo with an `origin`, a scripted agent, a fake PR host and a
//! JSONL event log: verifies provisioning, hydration, the cycle loop and the
//! final summary together.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use saga_worker::core::types::{NativeTask, TaskStatus};
use saga_worker::exit_codes;
use saga_worker::io::agent::CancelToken;
use saga_worker::io::config::WorkerConfig;
use saga_worker::io::events::JsonlEventSink;
use saga_worker::io::paths::SagaPaths;
use saga_worker::io::pr::{PullRequest, PullRequests};
use saga_worker::pipeline::{Collaborators, PipelineOptions, RunStatus, run_pipeline};
use saga_worker::test_support::{ScriptedCycle, ScriptedInvoker, TestRepo};

#[derive(Default)]
struct FakePrs {
    ready: Mutex<bool>,
}

impl PullRequests for FakePrs {
    fn create_draft(&self, _story_id: &str, _worktree: &Path) -> Result<PullRequest> {
        Ok(PullRequest {
            number: 1,
            url: "https://example.test/pr/1".to_string(),
        })
    }

    fn mark_ready(&self, _story_id: &str, _worktree: &Path) -> Result<()> {
        *self.ready.lock().expect("lock") = true;
        Ok(())
    }
}

fn read_records(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .expect("read log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

/// Three tasks finished over three cycles, with one failed cycle in between.
///
/// Cycle sequence:
/// 1. success, completes t1
/// 2. non-success (agent crashed), completes t2 anyway
/// 3. success, completes t3 -> all completed, loop stops
#[test]
fn story_runs_to_completion_across_retries() {
    let repo = TestRepo::with_origin().expect("repo");
    repo.commit_story(
        "login-flow",
        &[
            ("t1", TaskStatus::Pending),
            ("t2", TaskStatus::Pending),
            ("t3", TaskStatus::Pending),
        ],
    )
    .expect("story");
    let scratch = tempfile::tempdir().expect("scratch");
    let log_path = scratch.path().join("logs").join("messages.jsonl");

    let invoker = ScriptedInvoker::new(vec![
        ScriptedCycle::success().completing(&["t1"]),
        ScriptedCycle::non_success().completing(&["t2"]),
        ScriptedCycle::success().completing(&["t3"]),
        ScriptedCycle::success(),
    ]);
    let prs = FakePrs::default();
    let sink = JsonlEventSink::new(&log_path);
    let cancel = CancelToken::new();
    let opts = PipelineOptions {
        story_id: "login-flow".to_string(),
        project_root: repo.root().to_path_buf(),
        config: WorkerConfig {
            tasks_dir: Some(scratch.path().join("tasks")),
            ..WorkerConfig::default()
        },
        output_file: None,
    };

    let summary = run_pipeline(
        &opts,
        &Collaborators {
            invoker: &invoker,
            prs: &prs,
            sink: &sink,
            cancel: &cancel,
        },
    )
    .expect("pipeline");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.exit_code, exit_codes::OK);
    assert_eq!(summary.cycles, 3);
    assert_eq!(invoker.calls(), 3);
    assert!(*prs.ready.lock().expect("lock"));

    let worktree = SagaPaths::new(repo.root()).worktree("login-flow");
    assert!(worktree.join(".saga/stories/login-flow/t3.json").exists());

    let lists: Vec<_> = fs::read_dir(scratch.path().join("tasks"))
        .expect("tasks root")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(lists.len(), 1);
    let native: NativeTask =
        serde_json::from_str(&fs::read_to_string(lists[0].join("t1.json")).expect("t1"))
            .expect("native");
    assert_eq!(native.subject, "Task t1");

    drop(sink);
    let records = read_records(&log_path);
    let ends: Vec<&Value> = records
        .iter()
        .filter(|r| r["subtype"] == "cycle_end")
        .collect();
    assert_eq!(ends.len(), 3);
    assert_eq!(ends[1]["status"], "non_success");
    // Agent result records are forwarded verbatim between worker records.
    assert!(records.iter().any(|r| r["type"] == "result"));
    assert_eq!(records.last().expect("last")["subtype"], "pipeline_end");
}

/// A second run reuses the worktree and the branch from the first.
#[test]
fn rerun_reuses_worktree_and_stops_on_budget() {
    let repo = TestRepo::with_origin().expect("repo");
    repo.commit_story("billing", &[("t1", TaskStatus::Pending)])
        .expect("story");
    let scratch = tempfile::tempdir().expect("scratch");
    let opts = PipelineOptions {
        story_id: "billing".to_string(),
        project_root: repo.root().to_path_buf(),
        config: WorkerConfig {
            max_cycles: 1,
            tasks_dir: Some(scratch.path().join("tasks")),
            ..WorkerConfig::default()
        },
        output_file: Some(scratch.path().join("summary.json")),
    };
    let prs = FakePrs::default();
    let sink = JsonlEventSink::new(scratch.path().join("log.jsonl"));
    let cancel = CancelToken::new();

    for _ in 0..2 {
        let invoker = ScriptedInvoker::repeating(ScriptedCycle::non_success());
        let summary = run_pipeline(
            &opts,
            &Collaborators {
                invoker: &invoker,
                prs: &prs,
                sink: &sink,
                cancel: &cancel,
            },
        )
        .expect("pipeline");
        assert_eq!(summary.exit_code, exit_codes::INCOMPLETE);
        assert_eq!(summary.cycles, 1);
    }

    assert!(!*prs.ready.lock().expect("lock"));
    let written: Value = serde_json::from_str(
        &fs::read_to_string(scratch.path().join("summary.json")).expect("summary"),
    )
    .expect("json");
    assert_eq!(written["status"], "incomplete");
    assert_eq!(written["exitCode"], exit_codes::INCOMPLETE);
}
