//! Git adapter for worktree provisioning and hook checks.
//!
//! The worker only needs a handful of git operations, so we keep a small,
//! explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

const FALLBACK_MAIN_BRANCH: &str = "main";
const ORIGIN: &str = "origin";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Default branch of `origin` (from `refs/remotes/origin/HEAD`), or `main`
    /// when the remote HEAD is unknown.
    #[instrument(skip_all)]
    pub fn default_branch(&self) -> String {
        let branch = self
            .run_capture(&["symbolic-ref", "refs/remotes/origin/HEAD"])
            .ok()
            .and_then(|out| {
                out.trim()
                    .strip_prefix("refs/remotes/origin/")
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            });
        match branch {
            Some(name) => {
                debug!(branch = %name, "default branch");
                name
            }
            None => {
                debug!("origin/HEAD unknown, using fallback");
                FALLBACK_MAIN_BRANCH.to_string()
            }
        }
    }

    /// Fetch one branch from `origin`. Failures are logged, not returned.
    #[instrument(skip_all, fields(branch))]
    pub fn fetch_best_effort(&self, branch: &str) {
        if let Err(err) = self.run_checked(&["fetch", ORIGIN, branch]) {
            warn!(err = %format!("{err:#}"), "git fetch failed, continuing with local refs");
        }
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Add a worktree at `dir` for `branch`.
    ///
    /// With `start_point = Some(rev)` the branch is created from `rev`;
    /// otherwise the existing branch is checked out.
    #[instrument(skip_all, fields(branch, dir = %dir.display()))]
    pub fn worktree_add(&self, dir: &Path, branch: &str, start_point: Option<&str>) -> Result<()> {
        let dir_arg = dir.to_string_lossy();
        match start_point {
            Some(rev) => {
                debug!(rev, "creating branch in new worktree");
                self.run_checked(&["worktree", "add", "-b", branch, &dir_arg, rev])?;
            }
            None => {
                debug!("checking out existing branch in new worktree");
                self.run_checked(&["worktree", "add", &dir_arg, branch])?;
            }
        }
        Ok(())
    }

    /// Push `branch` to `origin` and set upstream.
    #[instrument(skip_all, fields(branch))]
    pub fn push_upstream(&self, branch: &str) -> Result<()> {
        self.run_checked(&["push", "-u", ORIGIN, branch])?;
        Ok(())
    }

    /// Porcelain status entries limited to `path`.
    pub fn status_for_path(&self, path: &Path) -> Result<Vec<StatusEntry>> {
        let path_arg = path.to_string_lossy();
        let out = self.run_capture(&["status", "--porcelain=v1", "--", &path_arg])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// True if `path` has uncommitted changes (including untracked).
    pub fn path_has_changes(&self, path: &Path) -> Result<bool> {
        Ok(!self.status_for_path(path)?.is_empty())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
