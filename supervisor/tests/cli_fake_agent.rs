//! End-to-end CLI run against a shell script standing in for the agent.
//!
//! Kept in its own test binary so no sibling test forks while the script is
//! still open for writing.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Output};

use supervisor::core::types::RunStatus;
use supervisor::exit_codes;
use supervisor::io::config::{AgentConfig, SupervisorConfig};
use supervisor::io::run_state::StateStore;
use supervisor::test_support::TestWorkspace;

const FAKE_AGENT: &str = r##"#!/bin/sh
case "$*" in
  *"--agent build"*)
    cat <<'JSON'
{"type":"text","sessionID":"ses_1","part":{"text":"Done."}}
JSON
    ;;
  *)
    cat <<'JSON'
{"type":"session.created","session":{"id":"ses_1"}}
{"type":"text","part":{"text":"Add a logger.\n```json\n{\"name\":\"edit_file\",\"arguments\":{\"path\":\"src/lib.rs\"}}\n```"}}
JSON
    ;;
esac
"##;

fn supervisor(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_supervisor"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn supervisor")
}

#[test]
fn run_pauses_then_approve_builds() {
    let workspace = TestWorkspace::new().expect("workspace");
    let script = workspace.path().join("fake-agent.sh");
    std::fs::write(&script, FAKE_AGENT).expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    workspace
        .write_config(&SupervisorConfig {
            agent: AgentConfig {
                command: script.display().to_string(),
                ..AgentConfig::default()
            },
            ..SupervisorConfig::default()
        })
        .expect("write config");

    let output = supervisor(workspace.path(), &["run", "add", "logging"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stdout}");
    assert!(stdout.contains("PLAN REQUIRING APPROVAL"));
    assert!(stdout.contains("1. edit_file"));
    assert!(stdout.contains("SUPERVISOR_SIGNAL: APPROVAL_REQUIRED"));
    assert!(stdout.contains("SESSION_ID: ses_1"));

    let store = workspace.store();
    let state = store.load().expect("load").expect("state");
    assert_eq!(state.status, RunStatus::AwaitingApproval);

    let output = supervisor(workspace.path(), &["approve"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Task completed"));

    let state = store.load().expect("load").expect("state");
    assert_eq!(state.status, RunStatus::Done);
    assert!(state.build_events.is_some());

    let output = supervisor(workspace.path(), &["status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Status: done"));
    assert!(stdout.contains("Task: add logging"));
}
