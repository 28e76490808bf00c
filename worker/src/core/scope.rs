//! Scope policy for file-touching agent tool calls.
//!
//! Every decision is a pure function of the requested path and the
//! [`AccessScope`]. Relative paths resolve against the worktree root (the
//! agent's working directory) and `..` is folded lexically, so no filesystem
//! state can change an answer.
//!
//! Rules, in order:
//!
//! 1. The path must stay inside the worktree.
//! 2. Nothing under `.saga/archive` may be touched.
//! 3. Under `.saga/stories/` only the scoped story's directory is visible.
//!    Under `.saga/epics/<epic>/stories/` nothing is visible.
//!
//! [`check_tool`] adds a fourth rule for write-capable tools: `.saga/` is
//! read-only apart from the scoped story's `journal.md`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::path::{relative_to, resolve, segments, strip_current_dir};
use crate::core::tools::ScopedTool;

/// Project metadata root inside a worktree.
pub const SAGA_DIR: &str = ".saga";
/// Reserved archive subtree marker.
pub const ARCHIVE_MARKER: &str = ".saga/archive";
const STORIES_DIR: &str = "stories";
const EPICS_DIR: &str = "epics";
const JOURNAL_FILE: &str = "journal.md";

/// The story and worktree one execution is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub story_id: String,
    pub worktree_path: PathBuf,
}

impl AccessScope {
    pub fn new(story_id: impl Into<String>, worktree_path: impl Into<PathBuf>) -> Self {
        Self {
            story_id: story_id.into(),
            worktree_path: worktree_path.into(),
        }
    }
}

/// Category of a denied access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    OutsideWorktree,
    ArchiveAccess,
    OtherStory,
    MetadataWrite,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::OutsideWorktree => "outside worktree",
            DenialReason::ArchiveAccess => "archive access",
            DenialReason::OtherStory => "other story",
            DenialReason::MetadataWrite => "metadata write",
        }
    }

    /// Single-line message surfaced to the agent.
    pub fn message(self) -> &'static str {
        match self {
            DenialReason::OutsideWorktree => {
                "Access outside worktree blocked: workers can only access files within their assigned worktree directory."
            }
            DenialReason::ArchiveAccess => {
                "Access to archive folder blocked: the archive holds completed stories and is read-only during execution."
            }
            DenialReason::OtherStory => {
                "Access to other story blocked: workers can only access their assigned story's files."
            }
            DenialReason::MetadataWrite => {
                ".saga write blocked: only the story's journal.md is writable inside .saga during execution."
            }
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a scope check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDecision {
    Allowed,
    Denied {
        reason: DenialReason,
        message: String,
    },
}

impl PathDecision {
    fn deny(reason: DenialReason) -> Self {
        PathDecision::Denied {
            reason,
            message: reason.message().to_string(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PathDecision::Allowed)
    }

    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            PathDecision::Allowed => None,
            PathDecision::Denied { reason, .. } => Some(*reason),
        }
    }
}

/// Decide whether `path` may be accessed under `scope`.
pub fn check(path: &str, scope: &AccessScope) -> PathDecision {
    let normalized = strip_current_dir(path);

    let Some(rel) = worktree_relative(normalized, &scope.worktree_path) else {
        return PathDecision::deny(DenialReason::OutsideWorktree);
    };

    if normalized.contains(ARCHIVE_MARKER) || rel_is_archive(&rel) {
        return PathDecision::deny(DenialReason::ArchiveAccess);
    }

    if !story_isolation_allows(&segments(&rel), &scope.story_id) {
        return PathDecision::deny(DenialReason::OtherStory);
    }

    PathDecision::Allowed
}

/// [`check`] plus the metadata write rule for write-capable tools.
pub fn check_tool(tool: ScopedTool, path: &str, scope: &AccessScope) -> PathDecision {
    let decision = check(path, scope);
    if !decision.is_allowed() || !tool.is_write() {
        return decision;
    }

    let normalized = strip_current_dir(path);
    let Some(rel) = worktree_relative(normalized, &scope.worktree_path) else {
        return PathDecision::deny(DenialReason::OutsideWorktree);
    };
    let parts = segments(&rel);
    let in_metadata = parts.first().is_some_and(|first| first == SAGA_DIR);
    if in_metadata && !is_story_journal(&parts, &scope.story_id) {
        return PathDecision::deny(DenialReason::MetadataWrite);
    }
    decision
}

/// Resolve `path` and return it relative to the worktree root, or `None` when
/// it escapes the worktree.
fn worktree_relative(path: &str, worktree: &Path) -> Option<PathBuf> {
    let root = resolve(Path::new("/"), worktree);
    let target = resolve(&root, Path::new(path));
    let rel = relative_to(&root, &target)?;
    if rel.is_absolute() || rel.starts_with("..") {
        return None;
    }
    Some(rel)
}

fn rel_is_archive(rel: &Path) -> bool {
    let parts = segments(rel);
    parts.len() >= 2 && parts[0] == SAGA_DIR && parts[1] == "archive"
}

fn story_isolation_allows(parts: &[String], story_id: &str) -> bool {
    if parts.first().map(String::as_str) != Some(SAGA_DIR) {
        return true;
    }
    match parts.get(1).map(String::as_str) {
        Some(STORIES_DIR) => parts.get(2).is_some_and(|id| id == story_id),
        // .saga/epics/<epic>/stories/... is a nested story materialization.
        Some(EPICS_DIR) => parts.get(3).map(String::as_str) != Some(STORIES_DIR),
        _ => true,
    }
}

fn is_story_journal(parts: &[String], story_id: &str) -> bool {
    parts.len() == 4
        && parts[0] == SAGA_DIR
        && parts[1] == STORIES_DIR
        && parts[2] == story_id
        && parts[3] == JOURNAL_FILE
}
