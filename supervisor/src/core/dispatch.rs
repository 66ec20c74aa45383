//! Decide what to do with the agent's single proposed next action.

use thiserror::Error;

use crate::core::types::ActionProposal;

/// Name of the plan-phase action that asks for further investigation.
pub const EXPLORE_ACTION: &str = "explore";
/// Depth used when an exploration action omits one.
pub const DEFAULT_EXPLORE_DEPTH: &str = "full";

/// An exploration action that cannot be dispatched.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("action '{action}' is missing required string argument '{argument}'")]
pub struct InvalidActionError {
    pub action: String,
    pub argument: &'static str,
}

/// Known action kinds; anything else is [`ActionKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Explore(ExploreRequest),
    Other(String),
}

impl ActionKind {
    pub fn classify(action: &ActionProposal) -> Result<Self, InvalidActionError> {
        match action.name.as_str() {
            EXPLORE_ACTION => Ok(ActionKind::Explore(ExploreRequest::from_action(action)?)),
            other => Ok(ActionKind::Other(other.to_string())),
        }
    }
}

/// Arguments of an exploration action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreRequest {
    pub search_task: String,
    pub depth: String,
}

impl ExploreRequest {
    fn from_action(action: &ActionProposal) -> Result<Self, InvalidActionError> {
        let search_task = action
            .str_argument("search_task")
            .ok_or_else(|| InvalidActionError {
                action: action.name.clone(),
                argument: "search_task",
            })?;
        let depth = action
            .str_argument("depth")
            .unwrap_or(DEFAULT_EXPLORE_DEPTH);
        Ok(Self {
            search_task: search_task.to_string(),
            depth: depth.to_string(),
        })
    }

    /// Follow-up instruction sent to the agent in the continued session.
    pub fn message(&self) -> String {
        format!("{} (depth: {})", self.search_task, self.depth)
    }
}

/// Why dispatching stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The agent proposed no next action.
    NoAction,
    /// The next action is not one the supervisor handles itself.
    Unhandled(String),
    /// The iteration budget is spent.
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Explore(ExploreRequest),
    Stop(StopReason),
}

/// Choose the next dispatch step given the remaining iteration budget.
pub fn next_dispatch(
    next_action: Option<&ActionProposal>,
    remaining_budget: u32,
) -> Result<Dispatch, InvalidActionError> {
    let Some(action) = next_action else {
        return Ok(Dispatch::Stop(StopReason::NoAction));
    };
    if remaining_budget == 0 {
        return Ok(Dispatch::Stop(StopReason::BudgetExhausted));
    }
    match ActionKind::classify(action)? {
        ActionKind::Explore(request) => Ok(Dispatch::Explore(request)),
        ActionKind::Other(name) => Ok(Dispatch::Stop(StopReason::Unhandled(name))),
    }
}
