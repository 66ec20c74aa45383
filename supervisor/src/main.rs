//! Supervisor CLI.
//!
//! State and config live under `.supervisor/` in the working directory, so
//! `run`, `approve` and `reject` may be separate invocations of the binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use supervisor::exit_codes;
use supervisor::io::agent::OpencodeAgent;
use supervisor::io::config::{SupervisorConfig, load_config};
use supervisor::io::init::{InitOptions, SupervisorPaths, init_supervisor};
use supervisor::io::run_state::{FileStateStore, StateStore};
use supervisor::io::summary::SummaryRenderer;
use supervisor::logging;
use supervisor::supervisor::{
    ApproveOutcome, RejectOutcome, StartOutcome, Supervisor, reject_pending,
};

#[derive(Parser)]
#[command(
    name = "supervisor",
    version,
    about = "Plan, approve and build with an external coding agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run for the given task, replacing any previous run.
    Run {
        /// Task text; multiple words are joined with spaces.
        #[arg(required = true, trailing_var_arg = true)]
        task: Vec<String>,
    },
    /// Approve the pending plan and run the build phase.
    Approve,
    /// Reject the pending plan.
    Reject,
    /// Print the persisted state of the current run.
    Status,
    /// Write `.supervisor/config.toml` with default values if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    logging::init();
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::FAILED);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = std::env::current_dir().context("resolve working directory")?;
    match cli.command {
        Command::Run { task } => cmd_run(root, &task.join(" ")),
        Command::Approve => cmd_approve(root),
        Command::Reject => cmd_reject(root),
        Command::Status => cmd_status(root),
        Command::Init { force } => cmd_init(root, force),
    }
}

/// State store and validated config for the working directory.
fn open_workspace(root: PathBuf) -> Result<(FileStateStore, SupervisorConfig)> {
    let paths = SupervisorPaths::new(root);
    let config = load_config(&paths.config_path)?;
    Ok((FileStateStore::new(&paths.state_path), config))
}

fn cmd_run(root: PathBuf, task: &str) -> Result<()> {
    let (store, config) = open_workspace(root)?;
    let agent = OpencodeAgent::from_config(&config.agent);

    match Supervisor::new(&store, &agent, &config).start(task)? {
        StartOutcome::NoPlan { plan } => {
            println!("No executable plan generated");
            println!("Plan text: {plan}");
        }
        StartOutcome::PlanRejected { keyword } => {
            println!("Plan rejected by policy (matched '{keyword}')");
        }
        StartOutcome::AwaitingApproval { stage, state } => {
            let rendered = SummaryRenderer::new()?.render_approval(&state, stage)?;
            println!("{rendered}");
        }
        StartOutcome::Completed => println!("Task completed"),
    }
    Ok(())
}

fn cmd_approve(root: PathBuf) -> Result<()> {
    let (store, config) = open_workspace(root)?;
    let agent = OpencodeAgent::from_config(&config.agent);

    match Supervisor::new(&store, &agent, &config).approve()? {
        ApproveOutcome::Completed => println!("Plan approved. Task completed"),
        ApproveOutcome::Refused(refusal) => println!("{refusal}"),
    }
    Ok(())
}

fn cmd_reject(root: PathBuf) -> Result<()> {
    let store = FileStateStore::new(SupervisorPaths::new(root).state_path);
    match reject_pending(&store)? {
        RejectOutcome::Rejected => println!("Plan rejected by user"),
        RejectOutcome::Refused(refusal) => println!("{refusal}"),
    }
    Ok(())
}

fn cmd_status(root: PathBuf) -> Result<()> {
    let store = FileStateStore::new(SupervisorPaths::new(root).state_path);
    match store.load()? {
        Some(state) => println!("{}", SummaryRenderer::new()?.render_status(&state)?),
        None => println!("No active task"),
    }
    Ok(())
}

fn cmd_init(root: PathBuf, force: bool) -> Result<()> {
    let paths = SupervisorPaths::new(&root);
    if init_supervisor(&root, &InitOptions { force })? {
        println!("Wrote {}", paths.config_path.display());
    } else {
        println!("{} already exists", paths.config_path.display());
    }
    Ok(())
}
