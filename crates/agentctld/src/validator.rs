//! The event validator: a stateful grammar check applied to every
//! event before it reaches the hub. Rejects anything that would leave a
//! subscriber's reconstructed transcript inconsistent — a run that never
//! started, a `text_message_end` with no matching start, a tool-call event
//! missing its id.

use std::collections::{HashMap, HashSet};

use agentctl_core::{Event, EventType, RunId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("first event for a run must be run_started, got {0}")]
    MustStartWithRunStarted(&'static str),
    #[error("run_started may only appear once, at the start of the sequence")]
    DuplicateRunStarted,
    #[error("text_message_content/end for message {0} with no matching text_message_start")]
    UnopenedMessage(String),
    #[error("text_message_start for message {0} is already open")]
    MessageAlreadyOpen(String),
    #[error("terminal event emitted while message {0} is still open")]
    TerminalWithOpenMessage(String),
    #[error("event already terminated this run")]
    AfterTerminal,
    #[error("{event_type} requires a messageId")]
    MissingMessageId { event_type: &'static str },
    #[error("{event_type} requires {field}")]
    MissingField { event_type: &'static str, field: &'static str },
    #[error("{event_type} requires data.{field}")]
    MissingDataField { event_type: &'static str, field: &'static str },
}

#[derive(Default)]
struct RunState {
    started: bool,
    terminated: bool,
    open_messages: HashSet<String>,
}

/// Tracks per-run grammar state across calls to [`validate`](Validator::validate).
#[derive(Default)]
pub struct Validator {
    runs: HashMap<RunId, RunState>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `event` against the grammar, recording its effect on that
    /// run's state only if it's accepted.
    pub fn validate(&mut self, event: &Event) -> Result<(), SequenceError> {
        Self::check_required_fields(event)?;

        let state = self.runs.entry(event.run_id.clone()).or_default();

        if !state.started {
            if event.event_type != EventType::RunStarted {
                return Err(SequenceError::MustStartWithRunStarted(event.event_type.as_str()));
            }
        } else if event.event_type == EventType::RunStarted {
            return Err(SequenceError::DuplicateRunStarted);
        }

        if state.terminated {
            return Err(SequenceError::AfterTerminal);
        }

        match event.event_type {
            EventType::TextMessageStart => {
                let id = event.message_id.clone().unwrap_or_default();
                if !state.open_messages.insert(id.clone()) {
                    return Err(SequenceError::MessageAlreadyOpen(id));
                }
            }
            EventType::TextMessageContent | EventType::TextMessageEnd => {
                let id = event.message_id.clone().unwrap_or_default();
                if event.event_type == EventType::TextMessageEnd {
                    if !state.open_messages.remove(&id) {
                        return Err(SequenceError::UnopenedMessage(id));
                    }
                } else if !state.open_messages.contains(&id) {
                    return Err(SequenceError::UnopenedMessage(id));
                }
            }
            _ if event.event_type.is_terminal() => {
                if let Some(open) = state.open_messages.iter().next() {
                    return Err(SequenceError::TerminalWithOpenMessage(open.clone()));
                }
            }
            _ => {}
        }

        state.started = true;
        if event.event_type.is_terminal() {
            state.terminated = true;
        }
        Ok(())
    }

    fn check_required_fields(event: &Event) -> Result<(), SequenceError> {
        let ty = event.event_type.as_str();
        match event.event_type {
            EventType::TextMessageStart | EventType::TextMessageContent | EventType::TextMessageEnd => {
                if event.message_id.is_none() {
                    return Err(SequenceError::MissingMessageId { event_type: ty });
                }
                if event.source.is_none() {
                    return Err(SequenceError::MissingField { event_type: ty, field: "source" });
                }
                if event.event_type == EventType::TextMessageContent {
                    if event.content.is_none() {
                        return Err(SequenceError::MissingField { event_type: ty, field: "content" });
                    }
                    if event.delta != Some(true) {
                        return Err(SequenceError::MissingField { event_type: ty, field: "delta" });
                    }
                }
                if event.event_type == EventType::TextMessageEnd && event.complete != Some(true) {
                    return Err(SequenceError::MissingField { event_type: ty, field: "complete" });
                }
            }
            EventType::ToolCallStarted | EventType::ToolCallFinished | EventType::ToolCallError => {
                if event.data_field("toolCallId").is_none() {
                    return Err(SequenceError::MissingDataField { event_type: ty, field: "toolCallId" });
                }
                if event.data_field("toolName").is_none() {
                    return Err(SequenceError::MissingDataField { event_type: ty, field: "toolName" });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Drops tracked state for a finished run.
    pub fn cleanup(&mut self, run_id: &RunId) {
        self.runs.remove(run_id);
    }
}
