//! Interception hook wiring for one agent invocation.
//!
//! [`InterceptionHooks`] maps a lifecycle phase to an ordered list of
//! matchers. Each matcher names the tools it fires on and the action the
//! worker performs. Actions that need I/O (journal gate, status sync) are
//! executed by the `hook` orchestration module; this module only describes
//! them and evaluates the pure scope check.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::scope::{AccessScope, PathDecision, check_tool};
use crate::core::tools::{ScopedTool, TASK_UPDATE_TOOL, ToolMatcher};

/// Agent lifecycle phase a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookPhase {
    PreToolUse,
    PostToolUse,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreToolUse => "PreToolUse",
            HookPhase::PostToolUse => "PostToolUse",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PreToolUse" => Some(HookPhase::PreToolUse),
            "PostToolUse" => Some(HookPhase::PostToolUse),
            _ => None,
        }
    }
}

/// What the worker does when a matcher fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Scope policy on the tool's path argument.
    ScopeCheck,
    /// Block `TaskUpdate(status=completed)` until the journal has changes.
    JournalGate,
    /// Mirror a `TaskUpdate` status into the story's task file.
    SyncTaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookMatcher {
    pub matcher: ToolMatcher,
    pub action: HookAction,
}

/// Answer returned to the agent for one intercepted tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    Deny { reason: String },
}

impl HookDecision {
    pub fn is_continue(&self) -> bool {
        matches!(self, HookDecision::Continue)
    }
}

impl From<PathDecision> for HookDecision {
    fn from(decision: PathDecision) -> Self {
        match decision {
            PathDecision::Allowed => HookDecision::Continue,
            PathDecision::Denied { message, .. } => HookDecision::Deny { reason: message },
        }
    }
}

/// Phase → ordered matchers for one story's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptionHooks {
    pub scope: AccessScope,
    phases: BTreeMap<HookPhase, Vec<HookMatcher>>,
}

impl InterceptionHooks {
    /// The standard hook set: scope check and journal gate before tool use,
    /// status sync after `TaskUpdate`.
    pub fn for_story(scope: AccessScope) -> Self {
        let mut phases = BTreeMap::new();
        phases.insert(
            HookPhase::PreToolUse,
            vec![
                HookMatcher {
                    matcher: ToolMatcher::scoped_file_tools(),
                    action: HookAction::ScopeCheck,
                },
                HookMatcher {
                    matcher: ToolMatcher::Named(TASK_UPDATE_TOOL),
                    action: HookAction::JournalGate,
                },
            ],
        );
        phases.insert(
            HookPhase::PostToolUse,
            vec![HookMatcher {
                matcher: ToolMatcher::Named(TASK_UPDATE_TOOL),
                action: HookAction::SyncTaskStatus,
            }],
        );
        Self { scope, phases }
    }

    pub fn phases(&self) -> impl Iterator<Item = (HookPhase, &[HookMatcher])> {
        self.phases
            .iter()
            .map(|(phase, matchers)| (*phase, matchers.as_slice()))
    }

    /// Actions that fire for `tool_name` in `phase`, in registration order.
    pub fn actions_for(&self, phase: HookPhase, tool_name: &str) -> Vec<HookAction> {
        self.phases
            .get(&phase)
            .map(|matchers| {
                matchers
                    .iter()
                    .filter(|m| m.matcher.matches(tool_name))
                    .map(|m| m.action)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Scope-check one tool request.
///
/// Tools outside the scoped set, and requests without a path argument, pass
/// through unchanged.
pub fn evaluate_scope(tool_name: &str, tool_input: &Value, scope: &AccessScope) -> HookDecision {
    let Some(tool) = ScopedTool::from_name(tool_name) else {
        return HookDecision::Continue;
    };
    let Some(path) = ScopedTool::path_arg(tool_input) else {
        return HookDecision::Continue;
    };
    check_tool(tool, path, scope).into()
}
