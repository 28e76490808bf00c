//! I/O adapters for the worker: filesystem, git, `gh`, the agent process and
//! the event log.

pub mod agent;
pub mod config;
pub mod events;
pub mod git;
pub mod hydrate;
pub mod paths;
pub mod pr;
pub mod process;
pub mod prompt;
pub mod story;
pub mod worktree;
