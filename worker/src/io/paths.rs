//! Canonical `.saga/` locations for a project root and its stories.

use std::path::{Path, PathBuf};

use crate::core::scope::SAGA_DIR;

pub const STORY_FILE: &str = "story.json";
pub const JOURNAL_FILE: &str = "journal.md";
pub const CONFIG_FILE: &str = "worker.toml";

/// All project-level paths within `.saga/`.
#[derive(Debug, Clone)]
pub struct SagaPaths {
    pub root: PathBuf,
    pub worktrees_dir: PathBuf,
    pub config_path: PathBuf,
}

impl SagaPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let saga_dir = root.join(SAGA_DIR);
        Self {
            worktrees_dir: saga_dir.join("worktrees"),
            config_path: saga_dir.join(CONFIG_FILE),
            root,
        }
    }

    pub fn worktree(&self, story_id: &str) -> PathBuf {
        self.worktrees_dir.join(story_id)
    }
}

/// Paths for one story, relative to whichever root (project or worktree) it
/// was built from.
#[derive(Debug, Clone)]
pub struct StoryPaths {
    pub story_id: String,
    pub dir: PathBuf,
    pub story_json: PathBuf,
    pub journal_md: PathBuf,
}

impl StoryPaths {
    pub fn new(root: &Path, story_id: &str) -> Self {
        let dir = root.join(SAGA_DIR).join("stories").join(story_id);
        Self {
            story_id: story_id.to_string(),
            story_json: dir.join(STORY_FILE),
            journal_md: dir.join(JOURNAL_FILE),
            dir,
        }
    }

    pub fn task_file(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }
}
