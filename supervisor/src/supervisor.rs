//! The supervisor state machine: `start`, `approve`, `reject`.
//!
//! Every transition is written through the injected [`StateStore`] before the
//! next step runs, so a later process can resume a run that paused in
//! `awaiting_approval`.

use std::fmt;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::intent::extract_intent;
use crate::core::policy::{find_forbidden_keyword, is_executable};
use crate::core::types::{ApprovalStage, RunStatus};
use crate::explore::{ExplorationEnd, run_exploration};
use crate::io::agent::{Agent, AgentRequest, invoke_and_decode};
use crate::io::config::SupervisorConfig;
use crate::io::run_state::{RunState, StateStore};

/// A session-continuing invocation was about to run without a session id.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no session_id detected before {phase}; cannot continue safely")]
pub struct MissingSessionError {
    pub phase: &'static str,
}

/// Result of `start`.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// The plan carried no structured actions.
    NoPlan { plan: String },
    /// The plan matched a forbidden keyword.
    PlanRejected { keyword: String },
    /// The run paused for a human decision.
    AwaitingApproval { stage: ApprovalStage, state: RunState },
    /// The build phase ran to completion.
    Completed,
}

/// Why `approve`/`reject` did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    NoState,
    NotAwaitingApproval(RunStatus),
    MissingSession,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NoState => f.write_str("No state found. Please run a task first."),
            Refusal::NotAwaitingApproval(status) => {
                write!(f, "Current status is '{status}', not awaiting approval")
            }
            Refusal::MissingSession => f.write_str("No session ID found in state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproveOutcome {
    Completed,
    Refused(Refusal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectOutcome {
    Rejected,
    Refused(Refusal),
}

/// Drives one run through plan, exploration, approval and build.
pub struct Supervisor<'a, S: StateStore, A: Agent> {
    store: &'a S,
    agent: &'a A,
    config: &'a SupervisorConfig,
}

impl<'a, S: StateStore, A: Agent> Supervisor<'a, S, A> {
    pub fn new(store: &'a S, agent: &'a A, config: &'a SupervisorConfig) -> Self {
        Self {
            store,
            agent,
            config,
        }
    }

    /// Start a new run for `task`, replacing any previous run.
    ///
    /// Agent and stream failures propagate and leave the last persisted
    /// transition in place.
    #[instrument(skip_all, fields(mode = %self.config.mode))]
    pub fn start(&self, task: &str) -> Result<StartOutcome> {
        let mut state = RunState::new(task, self.config.mode);
        self.store.save(&state)?;
        info!(task, "run started");

        let request = AgentRequest::plan(task, &self.config.project_path, None, Some(task));
        let reply = invoke_and_decode(self.agent, &request)?;
        let intent = extract_intent(&reply.events);

        state.observe_session(intent.session_id.as_deref());
        state.plan = intent.plan_text;
        state.actions = intent.proposals;
        self.store.save(&state)?;

        if !is_executable(&state.actions) {
            warn!("plan has no executable actions");
            state.transition(RunStatus::NoPlan)?;
            self.store.save(&state)?;
            return Ok(StartOutcome::NoPlan { plan: state.plan });
        }

        if let Some(keyword) =
            find_forbidden_keyword(&state.plan, &self.config.forbidden_plan_keywords)
        {
            warn!(keyword, "plan rejected by policy");
            let keyword = keyword.to_string();
            state.transition(RunStatus::PlanRejected)?;
            self.store.save(&state)?;
            return Ok(StartOutcome::PlanRejected { keyword });
        }

        let exploration = run_exploration(
            self.store,
            self.agent,
            self.config,
            &mut state,
            intent.next_action,
        )?;
        match exploration.end {
            ExplorationEnd::PlanRejected { keyword } => {
                return Ok(StartOutcome::PlanRejected { keyword });
            }
            ExplorationEnd::AwaitApproval => {
                return self.enter_awaiting_approval(state, ApprovalStage::AfterExploration);
            }
            ExplorationEnd::Settled => {}
        }

        if state.mode.requires_approval() {
            return self.enter_awaiting_approval(state, ApprovalStage::BeforeBuild);
        }

        require_session(self.store, &mut state, "build")?;
        self.build(&mut state)?;
        Ok(StartOutcome::Completed)
    }

    /// Approve a paused run and run the build phase.
    ///
    /// A failed build is recorded as `build_failed` and the error re-raised.
    #[instrument(skip_all)]
    pub fn approve(&self) -> Result<ApproveOutcome> {
        let mut state = match load_pending(self.store)? {
            Ok(state) => state,
            Err(refusal) => return Ok(ApproveOutcome::Refused(refusal)),
        };
        if state.session_id.is_none() {
            return Ok(ApproveOutcome::Refused(Refusal::MissingSession));
        }
        info!("plan approved");
        self.build(&mut state)?;
        Ok(ApproveOutcome::Completed)
    }

    /// Reject a paused run. See [`reject_pending`].
    pub fn reject(&self) -> Result<RejectOutcome> {
        reject_pending(self.store)
    }

    pub fn status(&self) -> Result<Option<RunState>> {
        self.store.load()
    }

    fn enter_awaiting_approval(
        &self,
        mut state: RunState,
        stage: ApprovalStage,
    ) -> Result<StartOutcome> {
        state.transition(RunStatus::AwaitingApproval)?;
        self.store.save(&state)?;
        info!(stage = stage.as_str(), session_id = ?state.session_id, "awaiting approval");
        Ok(StartOutcome::AwaitingApproval { stage, state })
    }

    fn build(&self, state: &mut RunState) -> Result<()> {
        let session_id = state
            .session_id
            .clone()
            .ok_or(MissingSessionError { phase: "build" })?;
        state.transition(RunStatus::Building)?;
        self.store.save(state)?;

        let request = AgentRequest::build(
            &self.config.project_path,
            &session_id,
            &self.config.build_message,
        );
        match invoke_and_decode(self.agent, &request) {
            Ok(reply) => {
                state.build_events = Some(reply.records);
                state.transition(RunStatus::Done)?;
                self.store.save(state)?;
                info!("build completed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "build failed");
                state.error = Some(format!("{err:#}"));
                state.transition(RunStatus::BuildFailed)?;
                self.store.save(state)?;
                Err(err)
            }
        }
    }
}

/// Reject a paused run. Only the store is touched; no agent is invoked.
#[instrument(skip_all)]
pub fn reject_pending<S: StateStore>(store: &S) -> Result<RejectOutcome> {
    let mut state = match load_pending(store)? {
        Ok(state) => state,
        Err(refusal) => return Ok(RejectOutcome::Refused(refusal)),
    };
    state.transition(RunStatus::Rejected)?;
    store.save(&state)?;
    info!("plan rejected by user");
    Ok(RejectOutcome::Rejected)
}

fn load_pending<S: StateStore>(store: &S) -> Result<Result<RunState, Refusal>> {
    let Some(state) = store.load()? else {
        return Ok(Err(Refusal::NoState));
    };
    if state.status != RunStatus::AwaitingApproval {
        return Ok(Err(Refusal::NotAwaitingApproval(state.status)));
    }
    Ok(Ok(state))
}

/// Return the run's session id, or record and raise [`MissingSessionError`].
pub(crate) fn require_session<S: StateStore>(
    store: &S,
    state: &mut RunState,
    phase: &'static str,
) -> Result<String> {
    if let Some(id) = &state.session_id {
        return Ok(id.clone());
    }
    let err = MissingSessionError { phase };
    state.error = Some(err.to_string());
    store.save(state)?;
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::StreamDecodeError;
    use crate::core::types::{ActionProposal, Mode};
    use crate::io::agent::{AgentInvocationError, AgentPhase};
    use crate::io::run_state::MemoryStateStore;
    use crate::test_support::{
        ScriptedAgent, ScriptedReply, agent_message, fenced, plan_reply, session_created, stream,
        text,
    };

    fn config(mode: Mode) -> SupervisorConfig {
        SupervisorConfig {
            mode,
            ..SupervisorConfig::default()
        }
    }

    fn awaiting_state() -> RunState {
        let mut state = RunState::new("add logging", Mode::ApproveAfterPlan);
        state.session_id = Some("s1".to_string());
        state.actions = vec![ActionProposal::new("edit_file")];
        state.status = RunStatus::AwaitingApproval;
        state
    }

    #[test]
    fn prose_without_actions_is_no_plan() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(stream(&[
            session_created("s1"),
            text("I would refactor things."),
        ]))]);
        let cfg = config(Mode::AutoApprove);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .start("refactor")
            .expect("start");
        assert_eq!(
            outcome,
            StartOutcome::NoPlan {
                plan: "I would refactor things.".to_string()
            }
        );
        assert_eq!(agent.requests().len(), 1);
        assert_eq!(
            store.status_history(),
            vec![RunStatus::Planning, RunStatus::Planning, RunStatus::NoPlan]
        );
    }

    #[test]
    fn forbidden_plan_never_builds() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(plan_reply(
            "s1",
            &format!(
                "First RM -RF the build dir.\n{}",
                fenced(&ActionProposal::new("run_shell"))
            ),
        ))]);
        let cfg = config(Mode::AutoApprove);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .start("clean")
            .expect("start");
        assert_eq!(
            outcome,
            StartOutcome::PlanRejected {
                keyword: "rm -rf".to_string()
            }
        );
        assert_eq!(agent.requests().len(), 1);
        let state = store.load().expect("load").expect("state");
        assert_eq!(state.status, RunStatus::PlanRejected);
    }

    #[test]
    fn executable_check_runs_before_keyword_check() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(stream(&[
            session_created("s1"),
            agent_message("drop database and start over"),
        ]))]);
        let cfg = config(Mode::AutoApprove);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .start("reset")
            .expect("start");
        assert!(matches!(outcome, StartOutcome::NoPlan { .. }));
    }

    #[test]
    fn approve_outside_awaiting_approval_is_a_reported_noop() {
        let store = MemoryStateStore::with_state(RunState::new("t", Mode::ApproveAfterPlan));
        let agent = ScriptedAgent::new(Vec::new());
        let cfg = config(Mode::ApproveAfterPlan);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .approve()
            .expect("approve");
        assert_eq!(
            outcome,
            ApproveOutcome::Refused(Refusal::NotAwaitingApproval(RunStatus::Planning))
        );
        assert!(agent.requests().is_empty());
        assert_eq!(store.status_history(), vec![RunStatus::Planning]);
    }

    #[test]
    fn approve_and_reject_without_state_are_refused() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(Vec::new());
        let cfg = config(Mode::ApproveAfterPlan);
        let supervisor = Supervisor::new(&store, &agent, &cfg);

        assert_eq!(
            supervisor.approve().expect("approve"),
            ApproveOutcome::Refused(Refusal::NoState)
        );
        assert_eq!(
            supervisor.reject().expect("reject"),
            RejectOutcome::Refused(Refusal::NoState)
        );
    }

    #[test]
    fn approve_builds_exactly_once() {
        let store = MemoryStateStore::with_state(awaiting_state());
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(stream(&[text("edited")]))]);
        let cfg = config(Mode::ApproveAfterPlan);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .approve()
            .expect("approve");
        assert_eq!(outcome, ApproveOutcome::Completed);

        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].phase, AgentPhase::Build);
        assert_eq!(requests[0].session_id(), Some("s1"));
        assert_eq!(requests[0].message, cfg.build_message);

        let state = store.load().expect("load").expect("state");
        assert_eq!(state.status, RunStatus::Done);
        assert_eq!(state.build_events.map(|events| events.len()), Some(1));
        assert_eq!(
            store.status_history(),
            vec![
                RunStatus::AwaitingApproval,
                RunStatus::Building,
                RunStatus::Done
            ]
        );
    }

    #[test]
    fn failed_build_is_recorded_and_reraised() {
        let store = MemoryStateStore::with_state(awaiting_state());
        let agent = ScriptedAgent::new(vec![ScriptedReply::Fail {
            exit_code: 3,
            stderr: "model overloaded".to_string(),
        }]);
        let cfg = config(Mode::ApproveAfterPlan);

        let err = Supervisor::new(&store, &agent, &cfg)
            .approve()
            .unwrap_err();
        assert!(err.downcast_ref::<AgentInvocationError>().is_some());

        let state = store.load().expect("load").expect("state");
        assert_eq!(state.status, RunStatus::BuildFailed);
        assert!(
            state
                .error
                .as_deref()
                .is_some_and(|e| e.contains("model overloaded"))
        );
        assert_eq!(agent.requests().len(), 1);
    }

    #[test]
    fn approve_without_session_is_refused() {
        let mut state = awaiting_state();
        state.session_id = None;
        let store = MemoryStateStore::with_state(state);
        let agent = ScriptedAgent::new(Vec::new());
        let cfg = config(Mode::ApproveAfterPlan);

        let outcome = Supervisor::new(&store, &agent, &cfg)
            .approve()
            .expect("approve");
        assert_eq!(outcome, ApproveOutcome::Refused(Refusal::MissingSession));
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn reject_moves_pending_run_to_rejected() {
        let store = MemoryStateStore::with_state(awaiting_state());
        let agent = ScriptedAgent::new(Vec::new());
        let cfg = config(Mode::ApproveAfterPlan);
        let supervisor = Supervisor::new(&store, &agent, &cfg);

        assert_eq!(supervisor.reject().expect("reject"), RejectOutcome::Rejected);
        assert_eq!(
            supervisor.reject().expect("reject again"),
            RejectOutcome::Refused(Refusal::NotAwaitingApproval(RunStatus::Rejected))
        );
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn auto_approve_without_session_is_a_precondition_error() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(stream(&[text(&fenced(
            &ActionProposal::new("edit_file"),
        ))]))]);
        let cfg = config(Mode::AutoApprove);

        let err = Supervisor::new(&store, &agent, &cfg)
            .start("add logging")
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<MissingSessionError>(),
            Some(&MissingSessionError { phase: "build" })
        );
        assert_eq!(agent.requests().len(), 1);
        let state = store.load().expect("load").expect("state");
        assert_eq!(state.status, RunStatus::Planning);
        assert!(state.error.is_some());
    }

    #[test]
    fn agent_failure_during_planning_aborts_start() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![ScriptedReply::Fail {
            exit_code: 1,
            stderr: "no such project".to_string(),
        }]);
        let cfg = config(Mode::AutoApprove);

        let err = Supervisor::new(&store, &agent, &cfg)
            .start("add logging")
            .unwrap_err();
        assert!(err.downcast_ref::<AgentInvocationError>().is_some());
        assert_eq!(store.status_history(), vec![RunStatus::Planning]);
    }

    #[test]
    fn new_start_replaces_previous_run() {
        let store = MemoryStateStore::with_state(awaiting_state());
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(stream(&[text("nothing")]))]);
        let cfg = config(Mode::ApproveAfterPlan);

        Supervisor::new(&store, &agent, &cfg)
            .start("another task")
            .expect("start");
        let state = store.load().expect("load").expect("state");
        assert_eq!(state.task, "another task");
        assert_eq!(state.session_id, None);
        assert!(state.actions.is_empty());
    }

    #[test]
    fn reject_pending_needs_only_the_store() {
        let store = MemoryStateStore::with_state(awaiting_state());
        assert_eq!(reject_pending(&store).expect("reject"), RejectOutcome::Rejected);
        assert_eq!(
            store.status_history(),
            vec![RunStatus::AwaitingApproval, RunStatus::Rejected]
        );
        assert_eq!(
            reject_pending(&MemoryStateStore::new()).expect("reject"),
            RejectOutcome::Refused(Refusal::NoState)
        );
    }

    #[test]
    fn failed_auto_build_is_recorded_and_reraised() {
        let store = MemoryStateStore::new();
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::Stream(plan_reply("s1", &fenced(&ActionProposal::new("edit_file")))),
            ScriptedReply::Fail {
                exit_code: 2,
                stderr: "disk full".to_string(),
            },
        ]);
        let cfg = config(Mode::AutoApprove);

        let err = Supervisor::new(&store, &agent, &cfg)
            .start("add logging")
            .unwrap_err();
        assert!(err.downcast_ref::<AgentInvocationError>().is_some());

        let requests = agent.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].phase, AgentPhase::Build);
        let state = store.load().expect("load").expect("state");
        assert_eq!(state.status, RunStatus::BuildFailed);
        assert!(state.error.as_deref().is_some_and(|e| e.contains("disk full")));
        assert!(state.build_events.is_none());
        assert_eq!(
            store.status_history().last().copied(),
            Some(RunStatus::BuildFailed)
        );
    }

    #[test]
    fn malformed_plan_stream_aborts_without_partial_plan() {
        let store = MemoryStateStore::new();
        let raw = format!(
            "{}\n{{\"type\":\"text\",\n",
            session_created("s1")
        );
        let agent = ScriptedAgent::new(vec![ScriptedReply::Stream(raw)]);
        let cfg = config(Mode::AutoApprove);

        let err = Supervisor::new(&store, &agent, &cfg)
            .start("add logging")
            .unwrap_err();
        let decode = err
            .downcast_ref::<StreamDecodeError>()
            .expect("stream decode error");
        assert!(matches!(decode, StreamDecodeError::MalformedLine { line: 2, .. }));

        assert_eq!(store.status_history(), vec![RunStatus::Planning]);
        let state = store.load().expect("load").expect("state");
        assert_eq!(state.session_id, None);
        assert!(state.plan.is_empty());
        assert!(state.actions.is_empty());
        assert_eq!(agent.requests().len(), 1);
    }
}
