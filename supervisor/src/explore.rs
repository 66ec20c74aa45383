//! Bounded exploration loop run between planning and approval.
//!
//! While the agent's next action is an exploration request and the budget
//! allows, the request is sent back to the agent in the same session and the
//! follow-up's proposals are merged into the run.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::dispatch::{Dispatch, next_dispatch};
use crate::core::intent::extract_intent;
use crate::core::policy::find_forbidden_keyword;
use crate::core::types::{ActionProposal, KeywordScope, RunStatus};
use crate::io::agent::{Agent, AgentRequest, invoke_and_decode};
use crate::io::config::SupervisorConfig;
use crate::io::run_state::{RunState, StateStore};
use crate::supervisor::require_session;

/// How the exploration loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorationEnd {
    /// No further exploration requested, or the budget ran out.
    Settled,
    /// A round completed in a mode that requires approval.
    AwaitApproval,
    /// The accumulated plan matched a forbidden keyword
    /// (only with [`KeywordScope::EveryRound`]).
    PlanRejected { keyword: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorationOutcome {
    /// Exploration invocations performed.
    pub rounds: u32,
    pub end: ExplorationEnd,
}

/// Run exploration rounds starting from `next_action`.
///
/// Each round is one dispatch attempt against `config.max_action_loops`.
/// Proposals are appended without deduplication. The state is saved after
/// every change.
pub fn run_exploration<S: StateStore, A: Agent>(
    store: &S,
    agent: &A,
    config: &SupervisorConfig,
    state: &mut RunState,
    mut next_action: Option<ActionProposal>,
) -> Result<ExplorationOutcome> {
    let mut remaining = config.max_action_loops;
    let mut rounds = 0u32;

    loop {
        let request = match next_dispatch(next_action.as_ref(), remaining)? {
            Dispatch::Explore(request) => request,
            Dispatch::Stop(reason) => {
                debug!(?reason, rounds, "exploration settled");
                return Ok(ExplorationOutcome {
                    rounds,
                    end: ExplorationEnd::Settled,
                });
            }
        };
        remaining -= 1;
        rounds += 1;

        let session_id = require_session(store, state, "exploration")?;
        state.transition(RunStatus::Exploring)?;
        store.save(state)?;
        info!(round = rounds, search_task = %request.search_task, depth = %request.depth, "exploring");

        let follow_up =
            AgentRequest::plan_continue(&config.project_path, &session_id, &request.message());
        let reply = invoke_and_decode(agent, &follow_up)?;
        let intent = extract_intent(&reply.events);

        debug!(new_proposals = intent.proposals.len(), "merging exploration results");
        state.actions.extend(intent.proposals);
        state.append_plan(&intent.plan_text);
        store.save(state)?;
        next_action = intent.next_action;

        if config.keyword_scope == KeywordScope::EveryRound
            && let Some(keyword) =
                find_forbidden_keyword(&state.plan, &config.forbidden_plan_keywords)
        {
            warn!(keyword, round = rounds, "explored plan rejected by policy");
            let keyword = keyword.to_string();
            state.transition(RunStatus::PlanRejected)?;
            store.save(state)?;
            return Ok(ExplorationOutcome {
                rounds,
                end: ExplorationEnd::PlanRejected { keyword },
            });
        }

        if state.mode.requires_approval() {
            return Ok(ExplorationOutcome {
                rounds,
                end: ExplorationEnd::AwaitApproval,
            });
        }
    }
}
