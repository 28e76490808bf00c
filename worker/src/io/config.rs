//! Worker configuration stored under `.saga/worker.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Fatal configuration problem detected before any cycle runs.
///
/// Returned through `anyhow` and recognised by downcast so callers can tell
/// configuration faults apart from runtime failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Worker configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults. CLI flags override
/// whatever is loaded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum agent invocations per run.
    pub max_cycles: u32,

    /// Wall-clock budget in minutes, checked between cycles.
    pub max_time_minutes: u64,

    /// Model identifier passed to the agent.
    pub model: String,

    /// Agent executable, resolved on `PATH` at startup.
    pub agent_binary: String,

    /// Root for native task lists. Defaults to `~/.claude/tasks`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_dir: Option<PathBuf>,

    /// Hard cap on a single cycle. Unset means a cycle runs until the agent exits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_timeout_minutes: Option<u64>,
}

/// Upper bound for minute-valued settings (one week).
pub const MAX_MINUTES: u64 = 7 * 24 * 60;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            max_time_minutes: 60,
            model: "opus".to_string(),
            agent_binary: "claude".to_string(),
            tasks_dir: None,
            cycle_timeout_minutes: None,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(ConfigError::new("max_cycles must be > 0").into());
        }
        if self.max_time_minutes == 0 {
            return Err(ConfigError::new("max_time_minutes must be > 0").into());
        }
        if self.max_time_minutes > MAX_MINUTES {
            return Err(
                ConfigError::new(format!("max_time_minutes must be <= {MAX_MINUTES}")).into(),
            );
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::new("model must be non-empty").into());
        }
        if self.agent_binary.trim().is_empty() {
            return Err(ConfigError::new("agent_binary must be non-empty").into());
        }
        match self.cycle_timeout_minutes {
            Some(0) => {
                return Err(ConfigError::new("cycle_timeout_minutes must be > 0 when set").into());
            }
            Some(minutes) if minutes > MAX_MINUTES => {
                return Err(ConfigError::new(format!(
                    "cycle_timeout_minutes must be <= {MAX_MINUTES}"
                ))
                .into());
            }
            _ => {}
        }
        Ok(())
    }

    /// Native task-list root, falling back to `~/.claude/tasks`.
    pub fn resolved_tasks_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.tasks_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::new("cannot determine home directory for tasks_dir"))?;
        Ok(home.join(".claude").join("tasks"))
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_cycles: Option<u32>,
    pub max_time_minutes: Option<u64>,
    pub model: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut cfg: WorkerConfig) -> Result<WorkerConfig> {
        if let Some(max_cycles) = self.max_cycles {
            cfg.max_cycles = max_cycles;
        }
        if let Some(max_time) = self.max_time_minutes {
            cfg.max_time_minutes = max_time;
        }
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkerConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkerConfig> {
    if !path.exists() {
        let cfg = WorkerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkerConfig = toml::from_str(&contents)
        .map_err(|err| ConfigError::new(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Resolve the agent executable on `PATH` (or as a literal path).
pub fn resolve_agent_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|err| {
        anyhow::Error::new(ConfigError::new(format!(
            "could not find agent binary `{name}` ({err}); ensure it is installed and on PATH"
        )))
    })
}
