//! The AG-UI event taxonomy: the closed set of event types and their wire envelope.
//!
//! Internal fields use idiomatic snake_case; `#[serde(rename_all = "camelCase")]`
//! on [`Event`] does the wire translation mandated for every externally-visible
//! event. A generic `data` bag exists only for forward-compatible extensions —
//! the concrete fields each event type carries are explicit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::RunId;

/// The closed set of event `type` values. Unknown values are rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunFinished,
    RunError,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    ToolCallStarted,
    ToolCallFinished,
    ToolCallError,
    /// Internal: C3 observed a state-document content change.
    StateChanged,
    /// Internal: `ApprovePlan` succeeded.
    PlanApproved,
    /// Internal: `CancelWorkflow` took effect.
    WorkflowCancelled,
    /// Internal: synthesized once per new hub subscriber, before replay.
    Connected,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::RunStarted => "run_started",
            EventType::RunFinished => "run_finished",
            EventType::RunError => "run_error",
            EventType::TextMessageStart => "text_message_start",
            EventType::TextMessageContent => "text_message_content",
            EventType::TextMessageEnd => "text_message_end",
            EventType::ToolCallStarted => "tool_call_started",
            EventType::ToolCallFinished => "tool_call_finished",
            EventType::ToolCallError => "tool_call_error",
            EventType::StateChanged => "state_changed",
            EventType::PlanApproved => "plan_approved",
            EventType::WorkflowCancelled => "workflow_cancelled",
            EventType::Connected => "connected",
        }
    }

    /// Parses a wire `type` string, returning `None` for anything outside the closed set.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "run_started" => EventType::RunStarted,
            "run_finished" => EventType::RunFinished,
            "run_error" => EventType::RunError,
            "text_message_start" => EventType::TextMessageStart,
            "text_message_content" => EventType::TextMessageContent,
            "text_message_end" => EventType::TextMessageEnd,
            "tool_call_started" => EventType::ToolCallStarted,
            "tool_call_finished" => EventType::ToolCallFinished,
            "tool_call_error" => EventType::ToolCallError,
            "state_changed" => EventType::StateChanged,
            "plan_approved" => EventType::PlanApproved,
            "workflow_cancelled" => EventType::WorkflowCancelled,
            "connected" => EventType::Connected,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::RunFinished | EventType::RunError | EventType::WorkflowCancelled)
    }
}

/// A single event on the wire. `sequence_num` is assigned by the hub at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Event {
    pub fn new(event_type: EventType, run_id: RunId) -> Self {
        Self {
            event_type,
            run_id,
            timestamp: Utc::now(),
            sequence_num: None,
            message_id: None,
            source: None,
            content: None,
            delta: None,
            complete: None,
            data: None,
        }
    }

    pub fn run_started(run_id: RunId) -> Self {
        Self::new(EventType::RunStarted, run_id)
    }

    pub fn run_started_with_warning(run_id: RunId, warning: impl Into<String>) -> Self {
        let mut ev = Self::run_started(run_id);
        let mut data = Map::new();
        data.insert("warning".to_string(), Value::String(warning.into()));
        ev.data = Some(data);
        ev
    }

    pub fn run_finished(run_id: RunId) -> Self {
        Self::new(EventType::RunFinished, run_id)
    }

    pub fn run_error(run_id: RunId, error: impl Into<String>) -> Self {
        let mut ev = Self::new(EventType::RunError, run_id);
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(error.into()));
        ev.data = Some(data);
        ev
    }

    pub fn text_message_start(run_id: RunId, message_id: impl Into<String>, source: impl Into<String>) -> Self {
        let mut ev = Self::new(EventType::TextMessageStart, run_id);
        ev.message_id = Some(message_id.into());
        ev.source = Some(source.into());
        ev
    }

    pub fn text_message_content(
        run_id: RunId,
        message_id: impl Into<String>,
        source: impl Into<String>,
        chunk: impl Into<String>,
    ) -> Self {
        let mut ev = Self::new(EventType::TextMessageContent, run_id);
        ev.message_id = Some(message_id.into());
        ev.source = Some(source.into());
        ev.content = Some(chunk.into());
        ev.delta = Some(true);
        ev
    }

    pub fn text_message_end(run_id: RunId, message_id: impl Into<String>, source: impl Into<String>) -> Self {
        let mut ev = Self::new(EventType::TextMessageEnd, run_id);
        ev.message_id = Some(message_id.into());
        ev.source = Some(source.into());
        ev.complete = Some(true);
        ev
    }

    pub fn tool_call(
        event_type: EventType,
        run_id: RunId,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        debug_assert!(matches!(
            event_type,
            EventType::ToolCallStarted | EventType::ToolCallFinished | EventType::ToolCallError
        ));
        let mut ev = Self::new(event_type, run_id);
        let mut data = Map::new();
        data.insert("toolCallId".to_string(), Value::String(tool_call_id.into()));
        data.insert("toolName".to_string(), Value::String(tool_name.into()));
        ev.data = Some(data);
        ev
    }

    pub fn state_changed(run_id: RunId, state: &crate::types::StateDocument) -> Self {
        let mut ev = Self::new(EventType::StateChanged, run_id);
        ev.data = serde_json::to_value(state)
            .ok()
            .and_then(|v| v.as_object().cloned());
        ev
    }

    pub fn plan_approved(run_id: RunId) -> Self {
        Self::new(EventType::PlanApproved, run_id)
    }

    pub fn workflow_cancelled(run_id: RunId) -> Self {
        Self::new(EventType::WorkflowCancelled, run_id)
    }

    pub fn connected(run_id: RunId) -> Self {
        Self::new(EventType::Connected, run_id)
    }

    /// Looks up a `data` field required by the validator's field table.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}
