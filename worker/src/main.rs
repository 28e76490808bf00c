//! `saga-worker`: run a story's tasks to completion with a coding agent.
//!
//! `saga-worker <story-id>` runs the pipeline. `saga-worker hook` is the
//! callback the agent invokes for intercepted tool calls. `saga-worker init`
//! writes the default `.saga/worker.toml`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use saga_worker::exit_codes;
use saga_worker::hook::run_hook;
use saga_worker::io::agent::{CancelToken, ClaudeInvoker, ENV_PROJECT_DIR, HookCommand};
use saga_worker::io::config::{
    ConfigError, ConfigOverrides, WorkerConfig, load_config, resolve_agent_binary, write_config,
};
use saga_worker::io::events::{EventSink, JsonlEventSink, NoopEventSink};
use saga_worker::io::paths::SagaPaths;
use saga_worker::io::pr::GhCli;
use saga_worker::logging;
use saga_worker::pipeline::{Collaborators, PipelineOptions, run_pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "saga-worker",
    version,
    about = "Run a story's tasks with a coding agent in an isolated worktree",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Story to execute (`.saga/stories/<story-id>`).
    story_id: Option<String>,

    /// Maximum agent cycles (default from config: 10).
    #[arg(long, value_name = "N")]
    max_cycles: Option<u32>,

    /// Wall-clock budget in minutes (default from config: 60).
    #[arg(long = "max-time", value_name = "MINUTES")]
    max_time: Option<u64>,

    /// Model passed to the agent (default from config: opus).
    #[arg(long)]
    model: Option<String>,

    /// Append worker and agent records as JSON lines to this file.
    #[arg(long, value_name = "PATH")]
    messages_file: Option<PathBuf>,

    /// Write the final summary as JSON to this file.
    #[arg(long, value_name = "PATH")]
    output_file: Option<PathBuf>,

    #[command(flatten)]
    project: ProjectArg,
}

#[derive(Args, Debug, Default, Clone)]
struct ProjectArg {
    /// Project root containing `.saga/`.
    #[arg(long, env = ENV_PROJECT_DIR, value_name = "DIR")]
    project_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one intercepted tool call (JSON on stdin, JSON on stdout).
    Hook {
        #[arg(long)]
        story_id: String,
        #[arg(long)]
        worktree: PathBuf,
    },
    /// Write the default `.saga/worker.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        project: ProjectArg,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::ERROR
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Some(Command::Hook { story_id, worktree }) => {
            run_hook(&story_id, &worktree, io::stdin().lock(), io::stdout().lock())?;
            Ok(exit_codes::OK)
        }
        Some(Command::Init { force, project }) => {
            cmd_init(&project_root(&project)?, force)?;
            Ok(exit_codes::OK)
        }
        None => cmd_run(cli.run),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let story_id = args
        .story_id
        .ok_or_else(|| ConfigError::new("missing required argument: <STORY_ID>"))?;
    let root = project_root(&args.project)?;
    let paths = SagaPaths::new(&root);

    let overrides = ConfigOverrides {
        max_cycles: args.max_cycles,
        max_time_minutes: args.max_time,
        model: args.model,
    };
    let config = overrides.apply(load_config(&paths.config_path)?)?;
    let binary = resolve_agent_binary(&config.agent_binary)?;
    debug!(binary = %binary.display(), "agent binary resolved");

    let invoker = ClaudeInvoker::new(binary, HookCommand::current()?);
    let sink: Box<dyn EventSink> = match &args.messages_file {
        Some(path) => Box::new(JsonlEventSink::new(path)),
        None => Box::new(NoopEventSink),
    };
    let prs = GhCli::default();
    let cancel = CancelToken::new();

    let opts = PipelineOptions {
        story_id,
        project_root: root,
        config,
        output_file: args.output_file,
    };
    let summary = run_pipeline(
        &opts,
        &Collaborators {
            invoker: &invoker,
            prs: &prs,
            sink: sink.as_ref(),
            cancel: &cancel,
        },
    )?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", summary.line()).context("write summary")?;
    Ok(summary.exit_code)
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let paths = SagaPaths::new(root);
    if !force && paths.config_path.exists() {
        debug!(path = %paths.config_path.display(), "config exists, leaving it");
        return Ok(());
    }
    write_config(&paths.config_path, &WorkerConfig::default())
}

fn project_root(arg: &ProjectArg) -> Result<PathBuf> {
    let dir = arg.project_dir.as_ref().ok_or_else(|| {
        ConfigError::new(format!(
            "project directory not set (use --project-dir or {ENV_PROJECT_DIR})"
        ))
    })?;
    std::path::absolute(dir).with_context(|| format!("resolve {}", dir.display()))
}
