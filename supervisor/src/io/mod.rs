//! I/O helpers for supervisor commands.

pub mod agent;
pub mod config;
pub mod init;
pub mod process;
pub mod run_state;
pub mod summary;
