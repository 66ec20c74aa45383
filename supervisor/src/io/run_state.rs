//! Persisted state of the single active run.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::{ActionProposal, Mode, RunStatus};

/// A state change the state machine does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Persisted bookkeeping for the current run (`.supervisor/state.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    /// Task text supplied to `start`.
    pub task: String,
    pub mode: Mode,
    pub status: RunStatus,
    /// Agent session shared by every invocation of this run.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Narrative shown to the approver.
    #[serde(default)]
    pub plan: String,
    /// Proposals in discovery order, duplicates included.
    #[serde(default)]
    pub actions: Vec<ActionProposal>,
    /// Raw build-phase event records, set once the build completes.
    #[serde(default)]
    pub build_events: Option<Vec<Value>>,
    /// Last fatal error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunState {
    pub fn new(task: impl Into<String>, mode: Mode) -> Self {
        Self {
            task: task.into(),
            mode,
            status: RunStatus::Planning,
            session_id: None,
            plan: String::new(),
            actions: Vec::new(),
            build_events: None,
            error: None,
        }
    }

    /// Move to `next`, refusing edges the state machine does not define.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), InvalidTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransitionError {
                from: self.status,
                to: next,
            });
        }
        info!(from = %self.status, to = %next, "run status transition");
        self.status = next;
        Ok(())
    }

    /// Record the session id unless one is already known.
    pub fn observe_session(&mut self, session_id: Option<&str>) {
        if self.session_id.is_none()
            && let Some(id) = session_id.filter(|id| !id.is_empty())
        {
            self.session_id = Some(id.to_string());
        }
    }

    /// Append a narrative section, separated from earlier text by a blank line.
    pub fn append_plan(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if !self.plan.is_empty() {
            self.plan.push_str("\n\n");
        }
        self.plan.push_str(text);
    }
}

/// Storage for the single live [`RunState`].
pub trait StateStore {
    /// Current state, or `None` if no run was ever started.
    fn load(&self) -> Result<Option<RunState>>;
    /// Replace the stored state wholesale.
    fn save(&self, state: &RunState) -> Result<()>;
}

/// JSON file store, written atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<RunState>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no run state on disk");
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read run state {}", self.path.display()))?;
        let state: RunState = serde_json::from_str(&contents)
            .with_context(|| format!("parse run state {}", self.path.display()))?;
        debug!(status = %state.status, session_id = ?state.session_id, "run state loaded");
        Ok(Some(state))
    }

    fn save(&self, state: &RunState) -> Result<()> {
        debug!(path = %self.path.display(), status = %state.status, "writing run state");
        let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}

/// In-process store. Keeps every saved snapshot so tests can assert on the
/// sequence of persisted transitions.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    history: RefCell<Vec<RunState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RunState) -> Self {
        Self {
            history: RefCell::new(vec![state]),
        }
    }

    /// Statuses of every saved snapshot, oldest first.
    pub fn status_history(&self) -> Vec<RunStatus> {
        self.history.borrow().iter().map(|s| s.status).collect()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<RunState>> {
        Ok(self.history.borrow().last().cloned())
    }

    fn save(&self, state: &RunState) -> Result<()> {
        self.history.borrow_mut().push(state.clone());
        Ok(())
    }
}
