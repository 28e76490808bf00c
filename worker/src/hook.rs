//! Hook callback handling (`saga-worker hook`).
//!
//! The agent runs this command for every matched tool call and pipes the
//! tool request JSON on stdin. We resolve the actions registered for the
//! phase and tool, run them in order, and answer with a continue/deny JSON
//! document on stdout. The first deny wins.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::hooks::{HookAction, HookDecision, HookPhase, InterceptionHooks, evaluate_scope};
use crate::core::scope::AccessScope;
use crate::core::types::TaskStatus;
use crate::io::git::Git;
use crate::io::paths::StoryPaths;
use crate::io::story::write_task_status;

/// Tool request as delivered by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct HookRequest {
    pub hook_event_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
}

/// Evaluate one request against the story's hooks.
#[instrument(skip_all, fields(phase = %request.hook_event_name, tool = %request.tool_name))]
pub fn evaluate(request: &HookRequest, hooks: &InterceptionHooks) -> HookDecision {
    let Some(phase) = HookPhase::parse(&request.hook_event_name) else {
        debug!("unhandled hook phase");
        return HookDecision::Continue;
    };

    for action in hooks.actions_for(phase, &request.tool_name) {
        let decision = match action {
            HookAction::ScopeCheck => {
                evaluate_scope(&request.tool_name, &request.tool_input, &hooks.scope)
            }
            HookAction::JournalGate => journal_gate(&request.tool_input, &hooks.scope),
            HookAction::SyncTaskStatus => {
                sync_task_status(&request.tool_input, &hooks.scope);
                HookDecision::Continue
            }
        };
        if let HookDecision::Deny { reason } = &decision {
            info!(?action, reason = %reason, "tool call denied");
            return decision;
        }
    }
    HookDecision::Continue
}

/// JSON answer for `decision` in `phase`.
pub fn response(phase: &str, decision: &HookDecision) -> Value {
    match decision {
        HookDecision::Continue => json!({ "continue": true }),
        HookDecision::Deny { reason } => json!({
            "hookSpecificOutput": {
                "hookEventName": phase,
                "permissionDecision": "deny",
                "permissionDecisionReason": reason,
            }
        }),
    }
}

/// Read a request from `input`, evaluate it for the story, write the answer
/// to `output`.
pub fn run_hook(
    story_id: &str,
    worktree: &Path,
    mut input: impl Read,
    mut output: impl Write,
) -> Result<()> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("read hook request")?;
    let request: HookRequest = serde_json::from_str(&raw).context("parse hook request")?;

    let hooks = InterceptionHooks::for_story(AccessScope::new(story_id, worktree));
    let decision = evaluate(&request, &hooks);
    let answer = response(&request.hook_event_name, &decision);

    serde_json::to_writer(&mut output, &answer).context("write hook response")?;
    writeln!(output).context("write hook response")?;
    Ok(())
}

fn journal_gate(tool_input: &Value, scope: &AccessScope) -> HookDecision {
    if tool_input.get("status").and_then(Value::as_str) != Some(TaskStatus::Completed.as_str()) {
        return HookDecision::Continue;
    }

    let story = StoryPaths::new(&scope.worktree_path, &scope.story_id);
    match Git::new(&scope.worktree_path).path_has_changes(&story.journal_md) {
        Ok(true) => HookDecision::Continue,
        Ok(false) => HookDecision::Deny {
            reason: format!(
                "Write a journal entry to {} before marking the task as completed.",
                story.journal_md.display()
            ),
        },
        Err(err) => {
            warn!(err = %format!("{err:#}"), "journal check failed, allowing");
            HookDecision::Continue
        }
    }
}

fn sync_task_status(tool_input: &Value, scope: &AccessScope) {
    let task_id = tool_input.get("taskId").and_then(Value::as_str);
    let status = tool_input
        .get("status")
        .and_then(Value::as_str)
        .and_then(TaskStatus::parse);
    let (Some(task_id), Some(status)) = (task_id, status) else {
        debug!("TaskUpdate without task id or status, nothing to sync");
        return;
    };

    let story = StoryPaths::new(&scope.worktree_path, &scope.story_id);
    match write_task_status(&story, task_id, status) {
        Ok(()) => debug!(task_id, status = status.as_str(), "task status synced"),
        Err(err) => warn!(task_id, err = %format!("{err:#}"), "task status sync failed"),
    }
}
