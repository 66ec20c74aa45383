//! Decoding of the agent's line-delimited JSON event stream.
//!
//! Decoding happens in stages. [`decode_utf8`] rejects output that is not
//! UTF-8, [`parse_event_lines`] turns the text into one JSON record per
//! non-blank line and fails on the first malformed line.
//! [`decode_events`] then maps each record onto the closed [`EventKind`] set;
//! records of an unknown or unexpected shape become [`EventKind::Ignored`]
//! instead of failing.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::ActionProposal;

/// Agent output that cannot be decoded into events.
#[derive(Debug, Error)]
pub enum StreamDecodeError {
    #[error("agent output is not valid UTF-8 (invalid byte at offset {offset})")]
    InvalidUtf8 { offset: usize },
    #[error("malformed agent event on line {line}: {source}")]
    MalformedLine {
        /// 1-indexed line number within the raw output.
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One decoded unit of agent output.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Session identifier carried by this event, resolved in priority order:
    /// the id embedded in a `session.created` event, a top-level `sessionID`,
    /// then `id`/`session_id` of a nested `session` or `context` object.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SessionCreated,
    /// `None` when the event carried no usable proposal.
    ActionProposed(Option<ActionProposal>),
    TextChunk(String),
    Message(String),
    Ignored,
}

/// Loose view over a single record. Every field is optional so that
/// unexpected shapes degrade to `Ignored` rather than failing the stream.
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "sessionID")]
    session_id: Option<Value>,
    session: Option<Value>,
    context: Option<Value>,
    action: Option<Value>,
    part: Option<Value>,
    content: Option<Value>,
}

/// Raw agent stdout as text. Undecodable bytes are an error, never replaced.
pub fn decode_utf8(bytes: Vec<u8>) -> Result<String, StreamDecodeError> {
    String::from_utf8(bytes).map_err(|err| StreamDecodeError::InvalidUtf8 {
        offset: err.utf8_error().valid_up_to(),
    })
}

/// Split raw output into JSON records, one per non-blank line.
pub fn parse_event_lines(raw: &str) -> Result<Vec<Value>, StreamDecodeError> {
    let mut records = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| StreamDecodeError::MalformedLine {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Map decoded records onto typed events, preserving order.
pub fn decode_events(records: &[Value]) -> Vec<Event> {
    records.iter().map(decode_event).collect()
}

fn decode_event(record: &Value) -> Event {
    let wire = WireEvent::deserialize(record).unwrap_or_default();

    let created_id = match wire.kind.as_deref() {
        Some("session.created") => wire.session.as_ref().and_then(|s| non_empty_str(s.get("id"))),
        _ => None,
    };
    let session_id = created_id
        .or_else(|| non_empty_str(wire.session_id.as_ref()))
        .or_else(|| nested_session_id(wire.session.as_ref()))
        .or_else(|| nested_session_id(wire.context.as_ref()));

    let kind = match wire.kind.as_deref() {
        Some("session.created") => EventKind::SessionCreated,
        Some("agent.action") => {
            EventKind::ActionProposed(wire.action.as_ref().and_then(ActionProposal::from_value))
        }
        Some("text") => match wire.part.as_ref().and_then(|p| non_empty_str(p.get("text"))) {
            Some(text) => EventKind::TextChunk(text),
            None => EventKind::Ignored,
        },
        Some("agent.message") => match non_empty_str(wire.content.as_ref()) {
            Some(content) => EventKind::Message(content),
            None => EventKind::Ignored,
        },
        _ => EventKind::Ignored,
    };

    Event { kind, session_id }
}

fn nested_session_id(meta: Option<&Value>) -> Option<String> {
    let meta = meta?.as_object()?;
    non_empty_str(meta.get("id")).or_else(|| non_empty_str(meta.get("session_id")))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
