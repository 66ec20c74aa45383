//! Human-readable rendering of the approval request and the status view.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::{ActionProposal, ApprovalStage};
use crate::io::run_state::RunState;

const APPROVAL_TEMPLATE: &str = include_str!("templates/approval.txt");
const STATUS_TEMPLATE: &str = include_str!("templates/status.txt");

const RULE_WIDTH: usize = 60;
/// Argument values longer than this are shortened in the status view.
const STATUS_VALUE_LIMIT: usize = 60;

#[derive(Debug, Serialize)]
struct ArgumentView {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ActionView {
    name: String,
    arguments: Vec<ArgumentView>,
}

impl ActionView {
    fn from_action(action: &ActionProposal, value_limit: Option<usize>) -> Self {
        let arguments = action
            .arguments
            .iter()
            .map(|(key, value)| {
                let value = display_value(value);
                ArgumentView {
                    key: key.clone(),
                    value: match value_limit {
                        Some(limit) => shorten(&value, limit),
                        None => value,
                    },
                }
            })
            .collect();
        Self {
            name: action.name.clone(),
            arguments,
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct SummaryRenderer {
    env: Environment<'static>,
}

impl SummaryRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("approval.txt", APPROVAL_TEMPLATE)
            .context("load approval template")?;
        env.add_template("status.txt", STATUS_TEMPLATE)
            .context("load status template")?;
        Ok(Self { env })
    }

    /// Approval request: planned actions, plan narrative and the
    /// machine-readable `SUPERVISOR_SIGNAL` lines.
    pub fn render_approval(&self, state: &RunState, stage: ApprovalStage) -> Result<String> {
        let actions: Vec<ActionView> = state
            .actions
            .iter()
            .map(|action| ActionView::from_action(action, None))
            .collect();
        let template = self.env.get_template("approval.txt")?;
        let rendered = template.render(context! {
            rule => "=".repeat(RULE_WIDTH),
            actions => actions,
            plan => (!state.plan.trim().is_empty()).then_some(state.plan.as_str()),
            session_id => state.session_id.as_deref().unwrap_or("(none)"),
            stage => stage.as_str(),
        })?;
        Ok(rendered)
    }

    pub fn render_status(&self, state: &RunState) -> Result<String> {
        let actions: Vec<ActionView> = state
            .actions
            .iter()
            .map(|action| ActionView::from_action(action, Some(STATUS_VALUE_LIMIT)))
            .collect();
        let template = self.env.get_template("status.txt")?;
        let rendered = template.render(context! {
            task => state.task,
            status => state.status.as_str(),
            mode => state.mode.as_str(),
            session_id => state.session_id.as_deref().unwrap_or("(none)"),
            error => state.error,
            actions => actions,
        })?;
        Ok(rendered)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shorten(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let kept: String = value.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}
