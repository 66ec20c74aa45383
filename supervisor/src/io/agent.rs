//! Agent abstraction for plan and build invocations.
//!
//! The [`Agent`] trait decouples the supervisor from the actual agent backend
//! (currently the `opencode` CLI). Tests use scripted agents that return
//! predetermined event streams without spawning processes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::events::{Event, decode_events, decode_utf8, parse_event_lines};
use crate::io::config::AgentConfig;
use crate::io::process::{CapturedOutput, run_captured};

/// Which agent profile an invocation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Proposes actions and narrative without modifying the project.
    Plan,
    /// Performs the modifying actions.
    Build,
}

impl AgentPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentPhase::Plan => "plan",
            AgentPhase::Build => "build",
        }
    }
}

/// Session handling for an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Open a fresh session, optionally titled.
    New { title: Option<String> },
    /// Continue an existing session.
    Continue(String),
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub phase: AgentPhase,
    pub project_path: PathBuf,
    pub session: SessionTarget,
    pub message: String,
}

impl AgentRequest {
    /// Planning invocation. Continues `session_id` when given, otherwise opens
    /// a new session titled `title`.
    pub fn plan(
        task: &str,
        project_path: &Path,
        session_id: Option<&str>,
        title: Option<&str>,
    ) -> Self {
        let session = match session_id {
            Some(id) => SessionTarget::Continue(id.to_string()),
            None => SessionTarget::New {
                title: title.map(str::to_string),
            },
        };
        Self {
            phase: AgentPhase::Plan,
            project_path: project_path.to_path_buf(),
            session,
            message: task.to_string(),
        }
    }

    /// Follow-up planning message within an existing session.
    pub fn plan_continue(project_path: &Path, session_id: &str, message: &str) -> Self {
        Self {
            phase: AgentPhase::Plan,
            project_path: project_path.to_path_buf(),
            session: SessionTarget::Continue(session_id.to_string()),
            message: message.to_string(),
        }
    }

    /// Build invocation continuing the planning session.
    pub fn build(project_path: &Path, session_id: &str, message: &str) -> Self {
        Self {
            phase: AgentPhase::Build,
            project_path: project_path.to_path_buf(),
            session: SessionTarget::Continue(session_id.to_string()),
            message: message.to_string(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.session {
            SessionTarget::Continue(id) => Some(id),
            SessionTarget::New { .. } => None,
        }
    }
}

/// Why an agent invocation was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ExitCode(i32),
    Signal,
    TimedOut,
    /// stdout exceeded the capture limit by this many bytes.
    Truncated(usize),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode(code) => write!(f, "exit code {code}"),
            FailureReason::Signal => f.write_str("terminated by signal"),
            FailureReason::TimedOut => f.write_str("timed out"),
            FailureReason::Truncated(bytes) => {
                write!(f, "stdout exceeded capture limit by {bytes} bytes")
            }
        }
    }
}

/// The agent process exited unsuccessfully or its output could not be trusted.
#[derive(Debug, Error)]
#[error("agent command failed ({reason})\nSTDERR: {stderr}\nSTDOUT: {stdout}")]
pub struct AgentInvocationError {
    pub reason: FailureReason,
    pub stderr: String,
    pub stdout: String,
}

/// Abstraction over agent backends. Returns the raw line-delimited event stream.
pub trait Agent {
    fn invoke(&self, request: &AgentRequest) -> Result<String>;
}

/// Agent that spawns the `opencode` CLI.
#[derive(Debug, Clone)]
pub struct OpencodeAgent {
    program: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl OpencodeAgent {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            program: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Command-line arguments (after the program name) for `request`.
    pub fn command_args(request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--dir".to_string(),
            request.project_path.display().to_string(),
            "--agent".to_string(),
            request.phase.as_str().to_string(),
        ];
        match &request.session {
            SessionTarget::Continue(id) => {
                args.extend(["--session".to_string(), id.clone(), "--continue".to_string()]);
            }
            SessionTarget::New { title: Some(title) } => {
                args.extend(["--title".to_string(), title.clone()]);
            }
            SessionTarget::New { title: None } => {}
        }
        args.extend([
            "--format".to_string(),
            "json".to_string(),
            request.message.clone(),
        ]);
        args
    }
}

impl Agent for OpencodeAgent {
    #[instrument(skip_all, fields(phase = request.phase.as_str(), session = ?request.session_id()))]
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        let args = Self::command_args(request);
        info!(program = %self.program, args = ?args, "invoking agent");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        let output = run_captured(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.program))?;

        accept_output(output)
    }
}

/// Turn a finished agent process into its event stream text.
///
/// A timeout, unsuccessful exit or truncated stdout is an
/// [`AgentInvocationError`]; stdout that is not UTF-8 is a
/// [`StreamDecodeError`](crate::core::events::StreamDecodeError).
fn accept_output(output: CapturedOutput) -> Result<String> {
    let failure = if output.timed_out {
        Some(FailureReason::TimedOut)
    } else if !output.status.success() {
        Some(match output.status.code() {
            Some(code) => FailureReason::ExitCode(code),
            None => FailureReason::Signal,
        })
    } else if output.stdout.dropped > 0 {
        Some(FailureReason::Truncated(output.stdout.dropped))
    } else {
        None
    };
    if let Some(reason) = failure {
        warn!(%reason, "agent invocation failed");
        return Err(AgentInvocationError {
            reason,
            stderr: output.stderr.lossy(),
            stdout: output.stdout.lossy(),
        }
        .into());
    }

    debug!(bytes = output.stdout.bytes.len(), "agent completed");
    Ok(decode_utf8(output.stdout.bytes)?)
}

/// Decoded result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Raw JSON records, one per non-blank output line.
    pub records: Vec<Value>,
    pub events: Vec<Event>,
}

/// Invoke the agent and decode its event stream.
///
/// Any malformed line fails the whole invocation.
pub fn invoke_and_decode<A: Agent + ?Sized>(
    agent: &A,
    request: &AgentRequest,
) -> Result<AgentReply> {
    let raw = agent.invoke(request)?;
    let records = parse_event_lines(&raw)?;
    let events = decode_events(&records);
    debug!(records = records.len(), "decoded agent events");
    Ok(AgentReply { records, events })
}
