//! CLI tests for the `saga-worker` binary.
//!
//! Spawns the binary and checks hook answers on stdout and exit codes for
//! fatal configuration errors.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};

use saga_worker::exit_codes;

fn run_hook(input: &Value, worktree: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_saga-worker"))
        .args(["hook", "--story-id", "auth", "--worktree", worktree])
        .env_remove("SAGA_PROJECT_DIR")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn saga-worker hook");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.to_string().as_bytes())
        .expect("write request");
    child.wait_with_output().expect("wait")
}

#[test]
fn hook_denies_access_to_other_story() {
    let out = run_hook(
        &json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Read",
            "tool_input": {"file_path": "/wt/.saga/stories/billing/story.json"},
        }),
        "/wt",
    );

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let answer: Value = serde_json::from_slice(&out.stdout).expect("json");
    let specific = &answer["hookSpecificOutput"];
    assert_eq!(specific["permissionDecision"], "deny");
    assert!(
        !specific["permissionDecisionReason"]
            .as_str()
            .expect("reason")
            .is_empty()
    );
}

#[test]
fn hook_allows_files_in_worktree() {
    let out = run_hook(
        &json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Edit",
            "tool_input": {"file_path": "src/lib.rs"},
        }),
        "/wt",
    );

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let answer: Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(answer, json!({"continue": true}));
}

#[test]
fn missing_project_dir_exits_with_error() {
    let out = Command::new(env!("CARGO_BIN_EXE_saga-worker"))
        .arg("auth")
        .env_remove("SAGA_PROJECT_DIR")
        .output()
        .expect("run saga-worker");

    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("project directory not set"), "{stderr}");
}

#[test]
fn invalid_flag_value_exits_with_error_not_incomplete() {
    let out = Command::new(env!("CARGO_BIN_EXE_saga-worker"))
        .args(["auth", "--max-cycles", "many"])
        .output()
        .expect("run saga-worker");

    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
}

#[test]
fn zero_max_cycles_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = Command::new(env!("CARGO_BIN_EXE_saga-worker"))
        .args(["auth", "--max-cycles", "0", "--project-dir"])
        .arg(temp.path())
        .output()
        .expect("run saga-worker");

    assert_eq!(out.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("max_cycles"), "{stderr}");
}
