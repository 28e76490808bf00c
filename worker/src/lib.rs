//! Autonomous story worker.
//!
//! Drives a coding agent through a story's tasks inside an isolated git
//! worktree: bounded cycles, file-access scoping via interception hooks, and
//! completion detected from the story's task files. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scope policy, budgets, task
//!   conversion, completion). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, `gh`, the agent
//!   process, the event log). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`cycle`], [`pipeline`], [`hook`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod hook;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
