//! Draft pull-request lifecycle for a story branch.
//!
//! [`PullRequests`] is the seam; [`GhCli`] drives the `gh` CLI. The pipeline
//! only ever creates a draft PR up front and marks it ready at the end.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::ids::story_branch;
use crate::io::git::Git;

/// An open pull request for a story branch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Abstraction over the PR host.
pub trait PullRequests {
    /// Return the story's PR, creating a draft one if none is open.
    fn create_draft(&self, story_id: &str, worktree: &Path) -> Result<PullRequest>;

    /// Flip the story's PR from draft to ready for review.
    fn mark_ready(&self, story_id: &str, worktree: &Path) -> Result<()>;
}

/// Mark the PR ready when the story completed. Failures are logged only.
pub fn mark_ready_if_completed<P: PullRequests + ?Sized>(
    prs: &P,
    story_id: &str,
    worktree: &Path,
    all_completed: bool,
) -> bool {
    if !all_completed {
        debug!("story incomplete, leaving PR as draft");
        return false;
    }
    match prs.mark_ready(story_id, worktree) {
        Ok(()) => true,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "could not mark PR ready");
            false
        }
    }
}

/// `gh` CLI implementation.
#[derive(Debug, Clone)]
pub struct GhCli {
    binary: String,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            binary: "gh".to_string(),
        }
    }
}

impl GhCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn find_open(&self, branch: &str, worktree: &Path) -> Result<Option<PullRequest>> {
        let out = self.run_checked(
            &[
                "pr", "list", "--head", branch, "--json", "number,url", "--limit", "1",
            ],
            worktree,
        )?;
        parse_pr_list(&String::from_utf8_lossy(&out.stdout))
    }

    fn run_checked(&self, args: &[&str], workdir: &Path) -> Result<Output> {
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(workdir)
            .output()
            .with_context(|| format!("spawn {} {}", self.binary, args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} failed: {}",
                self.binary,
                args.join(" "),
                stderr.trim()
            ));
        }
        Ok(output)
    }
}

impl PullRequests for GhCli {
    #[instrument(skip_all, fields(story_id))]
    fn create_draft(&self, story_id: &str, worktree: &Path) -> Result<PullRequest> {
        let branch = story_branch(story_id);
        if let Some(existing) = self.find_open(&branch, worktree)? {
            info!(number = existing.number, "reusing open PR");
            return Ok(existing);
        }

        Git::new(worktree)
            .push_upstream(&branch)
            .with_context(|| format!("push {branch}"))?;

        let title = format!("Story: {story_id}");
        let body = format!("Automated draft PR for story `{story_id}`.");
        self.run_checked(
            &[
                "pr", "create", "--draft", "--head", &branch, "--title", &title, "--body", &body,
            ],
            worktree,
        )?;
        let created = self
            .find_open(&branch, worktree)?
            .ok_or_else(|| anyhow!("created PR for {branch} not found"))?;
        info!(number = created.number, url = %created.url, "draft PR created");
        Ok(created)
    }

    #[instrument(skip_all, fields(story_id))]
    fn mark_ready(&self, story_id: &str, worktree: &Path) -> Result<()> {
        let branch = story_branch(story_id);
        self.run_checked(&["pr", "ready", &branch], worktree)?;
        info!("PR marked ready");
        Ok(())
    }
}

fn parse_pr_list(raw: &str) -> Result<Option<PullRequest>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let prs: Vec<PullRequest> = serde_json::from_str(trimmed).context("parse gh pr list")?;
    Ok(prs.into_iter().next())
}
