//! Agent invocation abstraction.
//!
//! The [`AgentInvoker`] trait decouples the cycle controller from the agent
//! backend (currently the `claude` CLI in stream-json mode). Tests use scripted
//! invokers that return predetermined statuses without spawning processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::core::hooks::InterceptionHooks;
use crate::core::types::TerminalStatus;
use crate::io::events::EventSink;
use crate::io::process::{
    LINE_CHANNEL_CAPACITY, join_reader_within, kill, read_stream_limited, spawn_line_reader,
    wait_or_kill,
};

pub const ENV_ENABLE_TASKS: &str = "CLAUDE_CODE_ENABLE_TASKS";
pub const ENV_TASK_LIST_ID: &str = "CLAUDE_CODE_TASK_LIST_ID";
pub const ENV_STORY_ID: &str = "SAGA_STORY_ID";
pub const ENV_STORY_TASK_LIST_ID: &str = "SAGA_STORY_TASK_LIST_ID";
pub const ENV_PROJECT_DIR: &str = "SAGA_PROJECT_DIR";
/// Set by a parent agent session; removed so the child does not think it is nested.
pub const ENV_NESTED_SESSION: &str = "CLAUDECODE";

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const EXIT_GRACE: Duration = Duration::from_secs(10);
/// How long output may stay open after the agent exits.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);
const STDERR_LIMIT_BYTES: usize = 64 * 1024;

/// Cooperative cancellation flag shared between the caller and an invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub model: String,
    /// Working directory for the agent (the story worktree).
    pub workdir: PathBuf,
    /// Extra environment, layered over the worker's own.
    pub env: BTreeMap<String, String>,
    pub hooks: InterceptionHooks,
    /// Hard cap on this invocation; `None` waits for the agent to exit.
    pub timeout: Option<Duration>,
}

/// Environment the agent needs to find its task list and story.
pub fn agent_env(story_id: &str, task_list_id: &str, worktree: &Path) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENV_ENABLE_TASKS.to_string(), "true".to_string()),
        (ENV_TASK_LIST_ID.to_string(), task_list_id.to_string()),
        (ENV_STORY_ID.to_string(), story_id.to_string()),
        (ENV_STORY_TASK_LIST_ID.to_string(), task_list_id.to_string()),
        (
            ENV_PROJECT_DIR.to_string(),
            worktree.to_string_lossy().into_owned(),
        ),
    ])
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    /// Run the agent to completion, forwarding every stream record to `sink`.
    ///
    /// `Ok` carries the terminal status. `Err` means the invocation could not
    /// be carried out at all (launch or transport failure).
    fn invoke(
        &self,
        request: &AgentRequest,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<TerminalStatus>;
}

/// Terminal status carried by a stream record, if it is the result record.
pub fn terminal_status_of(record: &Value) -> Option<TerminalStatus> {
    if record.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }
    let success = record.get("subtype").and_then(Value::as_str) == Some("success");
    Some(if success {
        TerminalStatus::Success
    } else {
        TerminalStatus::NonSuccess
    })
}

/// How the worker binary is re-entered to answer hook callbacks.
#[derive(Debug, Clone)]
pub struct HookCommand {
    pub executable: PathBuf,
}

impl HookCommand {
    /// The currently running worker binary.
    pub fn current() -> Result<Self> {
        let executable = std::env::current_exe().context("resolve worker executable")?;
        Ok(Self { executable })
    }

    fn command_line(&self, hooks: &InterceptionHooks) -> String {
        format!(
            "{} hook --story-id {} --worktree {}",
            shell_quote(&self.executable.to_string_lossy()),
            shell_quote(&hooks.scope.story_id),
            shell_quote(&hooks.scope.worktree_path.to_string_lossy()),
        )
    }

    /// Agent `--settings` document registering every matcher as a command hook.
    pub fn settings(&self, hooks: &InterceptionHooks) -> Value {
        let command = self.command_line(hooks);
        let mut phases = serde_json::Map::new();
        for (phase, matchers) in hooks.phases() {
            let entries: Vec<Value> = matchers
                .iter()
                .map(|m| {
                    json!({
                        "matcher": m.matcher.pattern(),
                        "hooks": [{"type": "command", "command": command}],
                    })
                })
                .collect();
            phases.insert(phase.as_str().to_string(), Value::Array(entries));
        }
        json!({ "hooks": phases })
    }
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Invoker that spawns the `claude` CLI in stream-json mode.
#[derive(Debug, Clone)]
pub struct ClaudeInvoker {
    pub binary: PathBuf,
    pub hook_command: HookCommand,
}

impl ClaudeInvoker {
    pub fn new(binary: PathBuf, hook_command: HookCommand) -> Self {
        Self {
            binary,
            hook_command,
        }
    }

    fn command(&self, request: &AgentRequest) -> Result<Command> {
        let settings = serde_json::to_string(&self.hook_command.settings(&request.hooks))
            .context("serialize hook settings")?;
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--model")
            .arg(&request.model)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--dangerously-skip-permissions")
            .arg("--settings")
            .arg(settings)
            .current_dir(&request.workdir)
            .env_remove(ENV_NESTED_SESSION)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl AgentInvoker for ClaudeInvoker {
    #[instrument(skip_all, fields(model = %request.model, workdir = %request.workdir.display()))]
    fn invoke(
        &self,
        request: &AgentRequest,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<TerminalStatus> {
        info!("starting agent");
        let mut child = match self.command(request)?.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, binary = %self.binary.display(), "failed to spawn agent");
                return Err(e).with_context(|| format!("spawn {}", self.binary.display()));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let (lines, stdout_handle) = spawn_line_reader(stdout, LINE_CHANNEL_CAPACITY);
        let stderr_handle = thread::spawn(move || read_stream_limited(stderr, STDERR_LIMIT_BYTES));

        // A timeout too large to represent is no deadline at all.
        let deadline = request.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut result: Option<TerminalStatus> = None;
        let mut interrupted = false;
        let mut records = 0usize;
        let mut exited_at: Option<Instant> = None;

        loop {
            match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => match serde_json::from_str::<Value>(&line) {
                    Ok(record) => {
                        records += 1;
                        if let Some(status) = terminal_status_of(&record) {
                            result = Some(status);
                        }
                        sink.write(&record);
                    }
                    Err(err) => debug!(err = %err, "skipping non-json agent output"),
                },
                Err(RecvTimeoutError::Timeout) => {
                    if exited_at.is_none() && child.try_wait().context("poll agent")?.is_some() {
                        exited_at = Some(Instant::now());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if exited_at.is_some_and(|at| at.elapsed() >= OUTPUT_GRACE) {
                warn!("agent exited but its stdout is still open, stopping");
                break;
            }
            if cancel.is_cancelled() {
                warn!("cancellation requested, stopping agent");
                interrupted = true;
                kill(&mut child)?;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    timeout_secs = ?request.timeout.map(|t| t.as_secs()),
                    "agent timed out, killing"
                );
                interrupted = true;
                kill(&mut child)?;
                break;
            }
        }
        drop(lines);

        let (status, killed) = wait_or_kill(&mut child, EXIT_GRACE)?;
        join_reader_within(stdout_handle, OUTPUT_GRACE).context("join stdout")?;
        let (stderr_bytes, stderr_truncated) = join_reader_within(stderr_handle, OUTPUT_GRACE)
            .context("join stderr")?
            .unwrap_or_default();
        if !stderr_bytes.is_empty() {
            debug!(
                stderr = %String::from_utf8_lossy(&stderr_bytes).trim(),
                stderr_truncated,
                "agent stderr"
            );
        }

        let terminal = match result {
            Some(TerminalStatus::Success) if status.success() && !interrupted && !killed => {
                TerminalStatus::Success
            }
            Some(_) => TerminalStatus::NonSuccess,
            None => {
                warn!(exit_code = ?status.code(), "agent exited without a result record");
                TerminalStatus::NonSuccess
            }
        };
        info!(records, exit_code = ?status.code(), status = ?terminal, "agent finished");
        Ok(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::AccessScope;
    use crate::test_support::{RecordingSink, script_command};

    fn request(workdir: &Path) -> AgentRequest {
        AgentRequest {
            prompt: "do the tasks".to_string(),
            model: "opus".to_string(),
            workdir: workdir.to_path_buf(),
            env: agent_env("auth", "saga__auth__1", workdir),
            hooks: InterceptionHooks::for_story(AccessScope::new("auth", workdir)),
            timeout: None,
        }
    }

    fn invoker(binary: PathBuf) -> ClaudeInvoker {
        ClaudeInvoker::new(
            binary,
            HookCommand {
                executable: PathBuf::from("/usr/local/bin/saga-worker"),
            },
        )
    }

    #[test]
    fn result_record_sets_terminal_status() {
        assert_eq!(
            terminal_status_of(&json!({"type": "result", "subtype": "success"})),
            Some(TerminalStatus::Success)
        );
        assert_eq!(
            terminal_status_of(&json!({"type": "result", "subtype": "error_max_turns"})),
            Some(TerminalStatus::NonSuccess)
        );
        assert_eq!(terminal_status_of(&json!({"type": "assistant"})), None);
    }

    #[test]
    fn agent_env_carries_task_list_and_story() {
        let env = agent_env("auth", "saga__auth__1", Path::new("/ws/auth"));
        assert_eq!(env[ENV_ENABLE_TASKS], "true");
        assert_eq!(env[ENV_TASK_LIST_ID], "saga__auth__1");
        assert_eq!(env[ENV_STORY_TASK_LIST_ID], "saga__auth__1");
        assert_eq!(env[ENV_STORY_ID], "auth");
        assert_eq!(env[ENV_PROJECT_DIR], "/ws/auth");
    }

    #[test]
    fn settings_register_each_phase() {
        let hooks = InterceptionHooks::for_story(AccessScope::new("auth", "/ws/it's"));
        let hook = HookCommand {
            executable: PathBuf::from("/bin/saga-worker"),
        };
        let settings = hook.settings(&hooks);
        let pre = settings["hooks"]["PreToolUse"].as_array().expect("pre");
        assert_eq!(pre.len(), 2);
        assert_eq!(pre[0]["matcher"], "Read|Write|Edit|Glob|Grep");
        assert_eq!(pre[1]["matcher"], "TaskUpdate");
        let command = pre[0]["hooks"][0]["command"].as_str().expect("command");
        assert!(command.starts_with("'/bin/saga-worker' hook --story-id 'auth'"));
        assert!(command.ends_with(r"--worktree '/ws/it'\''s'"));
        assert_eq!(settings["hooks"]["PostToolUse"][0]["matcher"], "TaskUpdate");
    }

    #[test]
    fn streams_records_and_reports_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = script_command(
            temp.path(),
            r#"echo '{"type":"system","subtype":"init"}'
echo 'not json'
echo "{\"type\":\"assistant\",\"env\":\"$CLAUDE_CODE_TASK_LIST_ID\"}"
echo '{"type":"result","subtype":"success"}'"#,
        )
        .expect("script");
        let sink = RecordingSink::default();
        let status = invoker(script)
            .invoke(&request(temp.path()), &sink, &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::Success);
        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["env"], "saga__auth__1");
    }

    #[test]
    fn error_result_is_non_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = script_command(
            temp.path(),
            r#"echo '{"type":"result","subtype":"error_during_execution"}'"#,
        )
        .expect("script");
        let status = invoker(script)
            .invoke(&request(temp.path()), &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::NonSuccess);
    }

    #[test]
    fn missing_result_or_failed_exit_is_non_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let silent = script_command(temp.path(), "echo '{\"type\":\"assistant\"}'").expect("script");
        let status = invoker(silent)
            .invoke(&request(temp.path()), &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::NonSuccess);

        let failing = script_command(
            temp.path(),
            "echo '{\"type\":\"result\",\"subtype\":\"success\"}'\nexit 3",
        )
        .expect("script");
        let status = invoker(failing)
            .invoke(&request(temp.path()), &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::NonSuccess);
    }

    #[test]
    fn timeout_kills_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = script_command(temp.path(), "exec sleep 30").expect("script");
        let mut req = request(temp.path());
        req.timeout = Some(Duration::from_millis(300));
        let started = Instant::now();
        let status = invoker(script)
            .invoke(&req, &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::NonSuccess);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script =
            script_command(temp.path(), r#"echo '{"type":"result","subtype":"success"}'"#)
                .expect("script");
        let mut req = request(temp.path());
        req.timeout = Some(Duration::from_secs(u64::MAX / 60 * 60));
        let status = invoker(script)
            .invoke(&req, &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::Success);
    }

    #[test]
    fn background_process_holding_stdout_does_not_hang_cycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = script_command(
            temp.path(),
            "echo '{\"type\":\"result\",\"subtype\":\"success\"}'\nsleep 30 &",
        )
        .expect("script");
        let started = Instant::now();
        let status = invoker(script)
            .invoke(&request(temp.path()), &RecordingSink::default(), &CancelToken::new())
            .expect("invoke");
        assert_eq!(status, TerminalStatus::Success);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn cancelled_token_stops_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = script_command(temp.path(), "exec sleep 30").expect("script");
        let cancel = CancelToken::new();
        cancel.cancel();
        let status = invoker(script)
            .invoke(&request(temp.path()), &RecordingSink::default(), &cancel)
            .expect("invoke");
        assert_eq!(status, TerminalStatus::NonSuccess);
    }

    #[test]
    fn missing_binary_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = invoker(temp.path().join("no-such-agent")).invoke(
            &request(temp.path()),
            &RecordingSink::default(),
            &CancelToken::new(),
        );
        assert!(result.is_err());
    }
}
