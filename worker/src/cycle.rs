//! Cycle controller: bounded, sequential agent invocations for one story.
//!
//! Each cycle invokes the agent once with the story's interception hooks,
//! then consults the completion detector. A cycle that ends in anything other
//! than success never ends the loop; only completion or budget exhaustion do.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::CycleBudget;
use crate::core::hooks::InterceptionHooks;
use crate::core::scope::AccessScope;
use crate::core::types::{LoopState, LoopStop, TerminalStatus};
use crate::io::agent::{AgentInvoker, AgentRequest, CancelToken, agent_env};
use crate::io::config::ConfigError;
use crate::io::events::{EventSink, WorkerEvent};
use crate::io::story::{all_tasks_completed, task_files};

/// Everything one loop needs, resolved once before the first cycle.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub story_id: String,
    /// Agent working directory; also the scope root.
    pub worktree: PathBuf,
    /// Story directory polled for task completion.
    pub story_dir: PathBuf,
    pub task_list_id: String,
    pub prompt: String,
    pub model: String,
    pub budget: CycleBudget,
    /// Optional hard cap on each invocation.
    pub cycle_timeout: Option<Duration>,
}

impl LoopConfig {
    fn request(&self) -> AgentRequest {
        AgentRequest {
            prompt: self.prompt.clone(),
            model: self.model.clone(),
            workdir: self.worktree.clone(),
            env: agent_env(&self.story_id, &self.task_list_id, &self.worktree),
            hooks: InterceptionHooks::for_story(AccessScope::new(
                self.story_id.clone(),
                self.worktree.clone(),
            )),
            timeout: self.cycle_timeout,
        }
    }
}

/// Summary of a loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub all_completed: bool,
    pub cycles_completed: u32,
    pub elapsed: Duration,
    pub stop: LoopStop,
}

/// Run cycles until every task is completed or a budget is exhausted.
///
/// Fails only on configuration problems detected before the first cycle
/// (`max_cycles == 0`, no task files). Invocation errors inside a cycle are
/// logged and counted as a non-success cycle.
#[instrument(skip_all, fields(story_id = %config.story_id, max_cycles = config.budget.max_cycles))]
pub fn run_cycles<A: AgentInvoker + ?Sized>(
    config: &LoopConfig,
    invoker: &A,
    sink: &dyn EventSink,
    cancel: &CancelToken,
) -> Result<LoopOutcome> {
    check_preconditions(config)?;

    let started = Instant::now();
    let request = config.request();
    let mut state = LoopState::default();

    let stop = loop {
        if cancel.is_cancelled() {
            info!("cancelled before next cycle");
            break LoopStop::Cancelled;
        }
        if let Some(stop) = config.budget.stop_reason(&state, started.elapsed()) {
            info!(?stop, cycles = state.cycles_completed, "budget exhausted");
            break stop;
        }

        let cycle = state.cycles_completed + 1;
        info!(cycle, max_cycles = config.budget.max_cycles, "starting cycle");
        sink.emit(&WorkerEvent::CycleStart {
            cycle,
            max_cycles: config.budget.max_cycles,
        });

        let status = match invoker.invoke(&request, sink, cancel) {
            Ok(status) => status,
            Err(err) => {
                warn!(cycle, err = %format!("{err:#}"), "agent invocation failed");
                TerminalStatus::NonSuccess
            }
        };

        state.cycles_completed = cycle;
        sink.emit(&WorkerEvent::CycleEnd { cycle, status });

        if !status.is_success() {
            debug!(cycle, "non-success cycle, skipping completion check");
            continue;
        }

        match all_tasks_completed(&config.story_dir) {
            Ok(true) => {
                state.all_completed = true;
                info!(cycle, "all tasks completed");
                break LoopStop::Completed;
            }
            Ok(false) => debug!(cycle, "tasks remain open"),
            Err(err) => {
                warn!(cycle, err = %format!("{err:#}"), "completion not confirmed");
            }
        }
    };

    Ok(LoopOutcome {
        all_completed: state.all_completed,
        cycles_completed: state.cycles_completed,
        elapsed: started.elapsed(),
        stop,
    })
}

fn check_preconditions(config: &LoopConfig) -> Result<()> {
    if config.budget.max_cycles == 0 {
        return Err(ConfigError::new("max_cycles must be > 0").into());
    }
    let files = task_files(&config.story_dir).map_err(|err| {
        ConfigError::new(format!(
            "cannot list tasks in {}: {err:#}",
            config.story_dir.display()
        ))
    })?;
    if files.is_empty() {
        return Err(ConfigError::new(format!(
            "no task files in {}",
            config.story_dir.display()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    use crate::core::types::TaskStatus;
    use crate::test_support::{RecordingSink, ScriptedCycle, ScriptedInvoker, TestStory};

    fn config(story: &TestStory, max_cycles: u32) -> LoopConfig {
        LoopConfig {
            story_id: story.story_id().to_string(),
            worktree: story.root().to_path_buf(),
            story_dir: story.paths().dir.clone(),
            task_list_id: "saga__auth__1".to_string(),
            prompt: "work".to_string(),
            model: "opus".to_string(),
            budget: CycleBudget {
                max_cycles,
                max_elapsed: Duration::from_secs(3600),
            },
            cycle_timeout: None,
        }
    }

    fn story_with_tasks(statuses: &[TaskStatus]) -> TestStory {
        let story = TestStory::new("auth").expect("story");
        for (idx, status) in statuses.iter().enumerate() {
            story.add_task(&format!("t{}", idx + 1), *status).expect("task");
        }
        story
    }

    #[test]
    fn stops_after_completing_cycle_without_extra_invocation() {
        let story = story_with_tasks(&[TaskStatus::Pending, TaskStatus::Pending]);
        let invoker = ScriptedInvoker::new(vec![
            ScriptedCycle::success().completing(&["t1"]),
            ScriptedCycle::success().completing(&["t2"]),
            ScriptedCycle::success(),
        ]);

        let outcome = run_cycles(
            &config(&story, 10),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert!(outcome.all_completed);
        assert_eq!(outcome.cycles_completed, 2);
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(invoker.calls(), 2);
    }

    #[test]
    fn never_exceeds_max_cycles() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker = ScriptedInvoker::repeating(ScriptedCycle::success());

        let outcome = run_cycles(
            &config(&story, 3),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert!(!outcome.all_completed);
        assert_eq!(outcome.cycles_completed, 3);
        assert_eq!(outcome.stop, LoopStop::CycleBudgetExhausted);
        assert_eq!(invoker.calls(), 3);
    }

    #[test]
    fn failing_cycle_never_completes_the_loop() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        // The agent completes the task but the run itself reports an error.
        let invoker = ScriptedInvoker::new(vec![
            ScriptedCycle::non_success().completing(&["t1"]),
            ScriptedCycle::success(),
        ]);

        let outcome = run_cycles(
            &config(&story, 5),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert!(outcome.all_completed);
        assert_eq!(outcome.cycles_completed, 2);
    }

    #[test]
    fn invocation_errors_are_retried() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker = ScriptedInvoker::new(vec![
            ScriptedCycle::launch_error(),
            ScriptedCycle::success().completing(&["t1"]),
        ]);

        let outcome = run_cycles(
            &config(&story, 5),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert!(outcome.all_completed);
        assert_eq!(outcome.cycles_completed, 2);
    }

    #[test]
    fn malformed_task_file_is_not_confirmed_and_loop_continues() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker = ScriptedInvoker::new(vec![
            ScriptedCycle::success().corrupting("t1"),
            ScriptedCycle::success().completing(&["t1"]),
        ]);

        let outcome = run_cycles(
            &config(&story, 5),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert!(outcome.all_completed);
        assert_eq!(outcome.cycles_completed, 2);
    }

    #[test]
    fn time_budget_blocks_new_cycles_but_not_in_flight_ones() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker =
            ScriptedInvoker::repeating(ScriptedCycle::success().taking(Duration::from_millis(80)));
        let mut cfg = config(&story, 10);
        cfg.budget.max_elapsed = Duration::from_millis(50);

        let outcome = run_cycles(
            &cfg,
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .expect("loop");

        assert_eq!(outcome.cycles_completed, 1);
        assert_eq!(outcome.stop, LoopStop::TimeBudgetExhausted);
        assert!(outcome.elapsed >= Duration::from_millis(80));
    }

    #[test]
    fn emits_cycle_events_in_order() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker = ScriptedInvoker::new(vec![
            ScriptedCycle::non_success(),
            ScriptedCycle::success().completing(&["t1"]),
        ]);
        let sink = RecordingSink::default();

        run_cycles(&config(&story, 5), &invoker, &sink, &CancelToken::new()).expect("loop");

        let records = sink.records();
        let kinds: Vec<String> = records
            .iter()
            .map(|r| {
                let kind = r["type"].as_str().unwrap_or_default();
                let subtype = r["subtype"].as_str().unwrap_or_default();
                format!("{kind}:{subtype}")
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "saga_worker:cycle_start",
                "result:error_during_execution",
                "saga_worker:cycle_end",
                "saga_worker:cycle_start",
                "result:success",
                "saga_worker:cycle_end",
            ]
        );

        let worker: Vec<&Value> = records
            .iter()
            .filter(|r| r["type"] == "saga_worker")
            .collect();
        assert_eq!(worker[0]["maxCycles"], 5);
        assert_eq!(worker[1]["status"], "non_success");
        assert_eq!(worker[3]["cycle"], 2);
        assert_eq!(worker[3]["status"], "success");
    }

    #[test]
    fn zero_task_files_is_fatal_before_any_cycle() {
        let story = TestStory::new("auth").expect("story");
        let invoker = ScriptedInvoker::repeating(ScriptedCycle::success());

        let err = run_cycles(
            &config(&story, 3),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert_eq!(invoker.calls(), 0);
    }

    #[test]
    fn zero_max_cycles_is_fatal() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let invoker = ScriptedInvoker::repeating(ScriptedCycle::success());
        let err = run_cycles(
            &config(&story, 0),
            &invoker,
            &RecordingSink::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn cancellation_stops_between_cycles() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let cancel = CancelToken::new();
        let invoker = ScriptedInvoker::repeating(ScriptedCycle::success()).cancelling(&cancel);

        let outcome = run_cycles(&config(&story, 5), &invoker, &RecordingSink::default(), &cancel)
            .expect("loop");

        assert_eq!(outcome.cycles_completed, 1);
        assert_eq!(outcome.stop, LoopStop::Cancelled);
    }

    #[test]
    fn request_carries_scope_and_env() {
        let story = story_with_tasks(&[TaskStatus::Pending]);
        let request = config(&story, 1).request();
        assert_eq!(request.hooks.scope.story_id, "auth");
        assert_eq!(request.env["CLAUDE_CODE_TASK_LIST_ID"], "saga__auth__1");
        assert_eq!(request.workdir, story.root());
    }
}
