//! Agent prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::StoryMeta;

const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");

/// Render the worker prompt: fixed instructions followed by the story brief.
///
/// Blank optional fields are omitted.
pub fn build_prompt(meta: &StoryMeta, story_id: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("worker", WORKER_TEMPLATE)
        .context("load worker template")?;
    let template = env.get_template("worker").context("get worker template")?;
    let rendered = template
        .render(context! {
            story_id => story_id,
            meta => meta,
        })
        .context("render worker prompt")?;
    debug!(bytes = rendered.len(), "prompt rendered");
    Ok(rendered)
}
