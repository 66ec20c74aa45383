//! Supervisor configuration stored under `.supervisor/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{KeywordScope, Mode};

/// Supervisor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below, and a missing or blank file yields `SupervisorConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Whether a human must approve the plan before the build phase.
    pub mode: Mode,

    /// Project directory the agent operates on.
    pub project_path: PathBuf,

    /// Upper bound on exploration dispatch attempts per `start`.
    pub max_action_loops: u32,

    /// Case-insensitive substrings that reject a plan outright.
    pub forbidden_plan_keywords: Vec<String>,

    /// Which plan text the forbidden-keyword check applies to.
    pub keyword_scope: KeywordScope,

    /// Instruction sent with the build-phase invocation.
    pub build_message: String,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable (looked up on `PATH` unless absolute).
    pub command: String,

    /// Wall-clock limit for a single agent invocation in seconds.
    pub timeout_secs: u64,

    /// Agent stdout beyond this many bytes fails the invocation.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "opencode".to_string(),
            timeout_secs: 60 * 60,
            output_limit_bytes: 16_000_000,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::ApproveAfterPlan,
            project_path: PathBuf::from("."),
            max_action_loops: 5,
            forbidden_plan_keywords: vec![
                "delete entire".to_string(),
                "rewrite whole".to_string(),
                "rm -rf".to_string(),
                "drop database".to_string(),
            ],
            keyword_scope: KeywordScope::InitialPlan,
            build_message: "Proceed with executing the plan".to_string(),
            agent: AgentConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must be non-empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.build_message.trim().is_empty() {
            return Err(anyhow!("build_message must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// A missing file or one containing only whitespace returns the defaults.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    let contents = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    } else {
        String::new()
    };

    let cfg = if contents.trim().is_empty() {
        debug!(path = %path.display(), "config absent or empty, using defaults");
        SupervisorConfig::default()
    } else {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SupervisorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
