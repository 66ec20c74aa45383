//! Canonical `.supervisor/` layout and scaffolding.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use super::config::{SupervisorConfig, write_config};

/// All canonical paths within `.supervisor/` for a working directory.
#[derive(Debug, Clone)]
pub struct SupervisorPaths {
    pub root: PathBuf,
    pub supervisor_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
}

impl SupervisorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let supervisor_dir = root.join(".supervisor");
        Self {
            root,
            config_path: supervisor_dir.join("config.toml"),
            state_path: supervisor_dir.join("state.json"),
            supervisor_dir,
        }
    }
}

/// Options for `init_supervisor`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config file.
    pub force: bool,
}

/// Write the default config unless one exists. Returns whether it was written.
pub fn init_supervisor(root: &Path, options: &InitOptions) -> Result<bool> {
    let paths = SupervisorPaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Ok(false);
    }
    write_config(&paths.config_path, &SupervisorConfig::default())?;
    info!(path = %paths.config_path.display(), "wrote default config");
    Ok(true)
}
