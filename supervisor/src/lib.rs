//! Human-in-the-loop supervisor for an external coding agent.
//!
//! A run moves through plan → (bounded exploration) → approval → build, and
//! no build-phase invocation happens until the plan has passed the policy
//! gate and, in `approve_after_plan` mode, a human has approved it. The crate
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (event decoding, intent
//!   extraction, policy, dispatch decisions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (agent process, config and state
//!   files, rendering). Behind traits where tests need to substitute them.
//!
//! Orchestration modules ([`supervisor`], [`explore`]) combine the two to
//! implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod explore;
pub mod io;
pub mod logging;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
