//! Story worktree provisioning (`.saga/worktrees/<story-id>` on `story/<story-id>`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::ids::story_branch;
use crate::io::git::Git;
use crate::io::paths::SagaPaths;

/// Result of [`setup_worktree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
    /// True when an existing worktree directory was reused.
    pub reused: bool,
}

/// Ensure the story's worktree exists.
///
/// An existing worktree directory is reused as-is. Otherwise the story branch
/// is checked out into a new worktree, creating it from `origin/<default>`
/// when it does not exist locally.
#[instrument(skip_all, fields(story_id, root = %project_root.display()))]
pub fn setup_worktree(story_id: &str, project_root: &Path) -> Result<Worktree> {
    let paths = SagaPaths::new(project_root);
    let dir = paths.worktree(story_id);
    let branch = story_branch(story_id);

    if dir.exists() {
        info!(path = %dir.display(), "reusing existing worktree");
        return Ok(Worktree {
            path: dir,
            branch,
            reused: true,
        });
    }

    let git = Git::new(project_root);
    let main = git.default_branch();
    git.fetch_best_effort(&main);

    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create worktrees dir {}", parent.display()))?;
    }

    let added = if git.branch_exists(&branch)? {
        debug!(branch = %branch, "branch exists");
        git.worktree_add(&dir, &branch, None)
    } else {
        let start = format!("origin/{main}");
        git.worktree_add(&dir, &branch, Some(&start))
    };
    added.with_context(|| format!("create worktree for {story_id}"))?;

    info!(path = %dir.display(), branch = %branch, "worktree created");
    Ok(Worktree {
        path: dir,
        branch,
        reused: false,
    })
}
