//! Test-only helpers: a scripted agent and builders for agent event lines.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::ActionProposal;
use crate::io::agent::{Agent, AgentInvocationError, AgentRequest, FailureReason};
use crate::io::config::{SupervisorConfig, write_config};
use crate::io::init::SupervisorPaths;
use crate::io::run_state::FileStateStore;

/// Scratch working directory with an empty `.supervisor/` directory.
pub struct TestWorkspace {
    temp: TempDir,
    pub paths: SupervisorPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let paths = SupervisorPaths::new(temp.path());
        fs::create_dir_all(&paths.supervisor_dir)
            .with_context(|| format!("create {}", paths.supervisor_dir.display()))?;
        Ok(Self { temp, paths })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// A fresh store over the workspace's state file, as a new process would open it.
    pub fn store(&self) -> FileStateStore {
        FileStateStore::new(&self.paths.state_path)
    }

    pub fn write_config(&self, config: &SupervisorConfig) -> Result<()> {
        write_config(&self.paths.config_path, config)
    }
}

/// One scripted response to an agent invocation.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Raw stdout returned as-is.
    Stream(String),
    /// Fail as if the agent process exited with `exit_code`.
    Fail { exit_code: i32, stderr: String },
}

/// Agent that replays queued replies and records every request it receives.
///
/// Once the queue is empty the optional fallback reply is returned for every
/// further invocation; without one, invocations fail.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }

    /// Return `reply` for every invocation.
    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted agent has no reply left"))?;
        match reply {
            ScriptedReply::Stream(raw) => Ok(raw),
            ScriptedReply::Fail { exit_code, stderr } => Err(AgentInvocationError {
                reason: FailureReason::ExitCode(exit_code),
                stderr,
                stdout: String::new(),
            }
            .into()),
        }
    }
}

pub fn session_created(id: &str) -> Value {
    json!({"type": "session.created", "session": {"id": id}})
}

pub fn text(content: &str) -> Value {
    json!({"type": "text", "part": {"text": content}})
}

pub fn agent_message(content: &str) -> Value {
    json!({"type": "agent.message", "content": content})
}

/// Explicit `agent.action` event carrying `proposal`.
pub fn action(proposal: &ActionProposal) -> Value {
    json!({"type": "agent.action", "action": proposal})
}

/// `proposal` as a ```` ```json ```` fenced block, the way agents embed it in prose.
pub fn fenced(proposal: &ActionProposal) -> String {
    format!("```json\n{}\n```", json!(proposal))
}

/// Join event records into a line-delimited stream.
pub fn stream(events: &[Value]) -> String {
    let mut out = events
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

/// A planning reply: session announcement followed by one text chunk.
pub fn plan_reply(session_id: &str, plan_text: &str) -> String {
    stream(&[session_created(session_id), text(plan_text)])
}
