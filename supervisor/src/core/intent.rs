//! Derive the agent's intent from one invocation's event sequence.

use serde_json::Value;

use crate::core::events::{Event, EventKind};
use crate::core::types::ActionProposal;

const FENCE: &str = "```";
/// Language tag accepted on an opening fence, as in ```` ```json ````.
const JSON_TAG: &str = "json";

/// Everything the supervisor needs from one agent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intent {
    /// First non-empty session identifier seen.
    pub session_id: Option<String>,
    /// Payload of the last explicit `agent.action` event.
    pub next_action: Option<ActionProposal>,
    /// Text chunks and messages joined with newlines, in encounter order.
    pub plan_text: String,
    /// Proposals recovered from fenced blocks inside text chunks.
    pub proposals: Vec<ActionProposal>,
}

/// Single forward pass over `events`.
pub fn extract_intent(events: &[Event]) -> Intent {
    let mut intent = Intent::default();
    let mut narrative: Vec<&str> = Vec::new();

    for event in events {
        if intent.session_id.is_none() {
            intent.session_id.clone_from(&event.session_id);
        }

        match &event.kind {
            EventKind::ActionProposed(action) => intent.next_action.clone_from(action),
            EventKind::TextChunk(text) => {
                narrative.push(text);
                intent.proposals.extend(extract_fenced_proposals(text));
            }
            EventKind::Message(content) => narrative.push(content),
            EventKind::SessionCreated | EventKind::Ignored => {}
        }
    }

    intent.plan_text = narrative.join("\n");
    intent
}

/// Recover action proposals written inline as fenced JSON blocks.
///
/// The text is split on the fence delimiter and every non-empty segment is
/// tried, so prose between blocks is attempted too and silently skipped when
/// it does not decode to a mapping with a `name`. Only a leading `json` tag is
/// removed; any other leading word leaves the segment unparsable.
pub fn extract_fenced_proposals(text: &str) -> Vec<ActionProposal> {
    text.split(FENCE)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let body = segment.strip_prefix(JSON_TAG).unwrap_or(segment);
            let value: Value = serde_json::from_str(body.trim()).ok()?;
            ActionProposal::from_value(&value)
        })
        .collect()
}
