//! Shared deterministic types for supervisor core logic.
//!
//! These types define stable contracts between the parser, extractor, policy
//! gate and state machine. They carry no I/O and serialize to the same shape
//! that is persisted in `.supervisor/state.json`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operating policy for a run, fixed at `start` from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Build immediately once the plan passes the policy gate.
    AutoApprove,
    /// Pause for a human decision before any build-phase invocation.
    #[default]
    ApproveAfterPlan,
}

impl Mode {
    pub fn requires_approval(self) -> bool {
        match self {
            Mode::AutoApprove => false,
            Mode::ApproveAfterPlan => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::AutoApprove => "auto_approve",
            Mode::ApproveAfterPlan => "approve_after_plan",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which plan text the forbidden-keyword check is applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordScope {
    /// Only the narrative returned by the initial planning invocation.
    #[default]
    InitialPlan,
    /// The accumulated narrative, re-checked after every exploration round.
    EveryRound,
}

/// State-machine state of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planning,
    Exploring,
    AwaitingApproval,
    Building,
    Done,
    NoPlan,
    PlanRejected,
    Rejected,
    BuildFailed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Planning => "planning",
            RunStatus::Exploring => "exploring",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Building => "building",
            RunStatus::Done => "done",
            RunStatus::NoPlan => "no_plan",
            RunStatus::PlanRejected => "plan_rejected",
            RunStatus::Rejected => "rejected",
            RunStatus::BuildFailed => "build_failed",
        }
    }

    /// Terminal states accept no further transition.
    ///
    /// `AwaitingApproval` is terminal-pending: the `start` call ends there, but
    /// a later `approve`/`reject` may still move it on.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Done
                | RunStatus::NoPlan
                | RunStatus::PlanRejected
                | RunStatus::Rejected
                | RunStatus::BuildFailed
        )
    }

    /// Legal edges of the supervisor state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::{
            AwaitingApproval, BuildFailed, Building, Done, Exploring, NoPlan, PlanRejected,
            Planning, Rejected,
        };
        matches!(
            (self, next),
            (
                Planning,
                NoPlan | PlanRejected | Exploring | AwaitingApproval | Building
            ) | (Exploring, Exploring | PlanRejected | AwaitingApproval | Building)
                | (AwaitingApproval, Building | Rejected)
                | (Building, Done | BuildFailed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point in the `start` flow at which the run paused for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStage {
    /// Right after the initial plan passed the policy gate.
    BeforeBuild,
    /// After an exploration round merged new proposals.
    AfterExploration,
}

impl ApprovalStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStage::BeforeBuild => "before build phase",
            ApprovalStage::AfterExploration => "after exploration",
        }
    }
}

/// A structured step the agent proposed.
///
/// Only `name` is required; argument values are kept as arbitrary JSON. Any
/// other top-level keys the agent sent are kept in `extra` so the persisted
/// proposal matches what the agent wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionProposal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Interpret a decoded record as a proposal.
    ///
    /// Returns `None` unless the record is a mapping with a string `name`.
    /// Non-mapping `arguments` are treated as absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let record = value.as_object()?;
        let name = record.get("name")?.as_str()?;
        let arguments = record
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let extra = record
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "name" | "arguments"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Some(Self {
            name: name.to_string(),
            arguments,
            extra,
        })
    }

    /// String value of an argument, if present and a string.
    pub fn str_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_snake_case() {
        let raw = serde_json::to_string(&RunStatus::AwaitingApproval).expect("serialize");
        assert_eq!(raw, "\"awaiting_approval\"");
        let parsed: RunStatus = serde_json::from_str("\"build_failed\"").expect("parse");
        assert_eq!(parsed, RunStatus::BuildFailed);
    }

    #[test]
    fn mode_defaults_to_approval() {
        assert_eq!(Mode::default(), Mode::ApproveAfterPlan);
        assert!(Mode::ApproveAfterPlan.requires_approval());
        assert!(!Mode::AutoApprove.requires_approval());
    }

    #[test]
    fn approve_and_reject_only_leave_awaiting_approval() {
        for from in [
            RunStatus::Planning,
            RunStatus::Exploring,
            RunStatus::Building,
            RunStatus::Done,
            RunStatus::Rejected,
        ] {
            assert!(!from.can_transition_to(RunStatus::Rejected), "{from}");
        }
        assert!(RunStatus::AwaitingApproval.can_transition_to(RunStatus::Building));
        assert!(RunStatus::AwaitingApproval.can_transition_to(RunStatus::Rejected));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let all = [
            RunStatus::Planning,
            RunStatus::Exploring,
            RunStatus::AwaitingApproval,
            RunStatus::Building,
            RunStatus::Done,
            RunStatus::NoPlan,
            RunStatus::PlanRejected,
            RunStatus::Rejected,
            RunStatus::BuildFailed,
        ];
        for from in all.iter().copied().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{from}");
        }
    }

    #[test]
    fn proposal_requires_string_name() {
        assert!(ActionProposal::from_value(&json!({"arguments": {}})).is_none());
        assert!(ActionProposal::from_value(&json!({"name": 3})).is_none());
        assert!(ActionProposal::from_value(&json!(["name"])).is_none());

        let proposal =
            ActionProposal::from_value(&json!({"name": "edit_file", "arguments": "oops"}))
                .expect("proposal");
        assert_eq!(proposal, ActionProposal::new("edit_file"));
    }

    #[test]
    fn proposal_keeps_unknown_keys_through_state_json() {
        let raw = json!({"name": "edit_file", "arguments": {"path": "a.rs"}, "reason": "typo"});
        let proposal = ActionProposal::from_value(&raw).expect("proposal");
        assert_eq!(proposal.extra.get("reason"), Some(&json!("typo")));
        assert_eq!(serde_json::to_value(&proposal).expect("serialize"), raw);

        let parsed: ActionProposal = serde_json::from_value(raw).expect("parse");
        assert_eq!(parsed, proposal);
    }
}
