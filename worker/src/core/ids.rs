//! Identifier formats: story ids, branches and native task-list ids.

use std::sync::LazyLock;

use regex::Regex;

static STORY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("story id regex"));

const TASK_LIST_PREFIX: &str = "saga";
const BRANCH_PREFIX: &str = "story/";

/// Story ids are lowercase ASCII letters, digits and hyphens.
pub fn is_valid_story_id(id: &str) -> bool {
    STORY_ID_RE.is_match(id)
}

/// Git branch a story's worktree is checked out on.
pub fn story_branch(story_id: &str) -> String {
    format!("{BRANCH_PREFIX}{story_id}")
}

/// Native task-list id for one hydration: `saga__<story>__<millis>`.
pub fn task_list_id(story_id: &str, unix_millis: i64) -> String {
    format!("{TASK_LIST_PREFIX}__{story_id}__{unix_millis}")
}
