//! The event schema (spec §3 "AgentEvent", §6 "Event type enumeration").
//!
//! This is the central invariant of the whole system: every consumer
//! (live UI, plugins, the JSONL trace, the stats collector) sees the same
//! closed set of event types over the same strictly-increasing `sequence`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Attachment, ToolCall, ToolResult};
use crate::stats::RunStats;

/// Current `AgentEvent` schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// The closed set of event types (spec §6, exact wire values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.finished")]
    RunFinished,
    #[serde(rename = "run.error")]
    RunError,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
    #[serde(rename = "run.timed_out")]
    RunTimedOut,
    #[serde(rename = "iter.started")]
    IterStarted,
    #[serde(rename = "iter.finished")]
    IterFinished,
    #[serde(rename = "model.delta")]
    ModelDelta,
    #[serde(rename = "model.completed")]
    ModelCompleted,
    #[serde(rename = "thinking.start")]
    ThinkingStart,
    #[serde(rename = "thinking.delta")]
    ThinkingDelta,
    #[serde(rename = "thinking.end")]
    ThinkingEnd,
    #[serde(rename = "tool.requested")]
    ToolRequested,
    #[serde(rename = "tool.started")]
    ToolStarted,
    #[serde(rename = "tool.stdout")]
    ToolStdout,
    #[serde(rename = "tool.stderr")]
    ToolStderr,
    #[serde(rename = "tool.finished")]
    ToolFinished,
    #[serde(rename = "tool.timed_out")]
    ToolTimedOut,
    #[serde(rename = "tool.failed")]
    ToolFailed,
    #[serde(rename = "tool.denied")]
    ToolDenied,
    #[serde(rename = "tool.approval_required")]
    ToolApprovalRequired,
    #[serde(rename = "context.packed")]
    ContextPacked,
}

impl EventType {
    /// The four terminal run events (spec §3 invariant iii).
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            EventType::RunFinished
                | EventType::RunError
                | EventType::RunCancelled
                | EventType::RunTimedOut
        )
    }

    /// High-priority lane membership for the two-lane backpressure sink
    /// (spec §4.5): everything except streaming text/output chunks.
    pub fn is_high_priority(&self) -> bool {
        !matches!(
            self,
            EventType::ModelDelta | EventType::ToolStdout | EventType::ToolStderr
        )
    }
}

/// Streaming/model payload, carried by `model.*` and `thinking.*` events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

/// Tool payload, carried by `tool.*` events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPayload {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ToolPayload {
    pub fn requested(call: &ToolCall) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: Some(call.tool_name.clone()),
            arguments: Some(call.arguments.clone()),
            content: None,
            is_error: None,
            attachments: Vec::new(),
        }
    }

    pub fn finished(call_id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: None,
            arguments: None,
            content: Some(result.content.clone()),
            is_error: Some(result.is_error),
            attachments: result.attachments.clone(),
        }
    }
}

/// Error payload, carried by `run.error` and `tool.denied`/`tool.approval_required`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Context-packing payload, carried by `context.packed`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextPayload {
    pub included_messages: usize,
    pub dropped_items: usize,
    pub token_estimate: u64,
}

/// The union of every event's optional typed payload (spec §3: "Zero or one
/// typed payload from {stream, tool, error, stats, context}").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Stream(StreamPayload),
    Tool(ToolPayload),
    Error(ErrorPayload),
    Stats(Box<RunStats>),
    Context(ContextPayload),
}

/// One event in a run's strictly-ordered event stream (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub version: u32,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub time: DateTime<Utc>,
    pub sequence: u64,
    pub run_id: String,
    pub turn_index: u32,
    pub iter_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_spec() {
        let ty = EventType::RunTimedOut;
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, "\"run.timed_out\"");
        let ty = EventType::ToolApprovalRequired;
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"tool.approval_required\"");
    }

    #[test]
    fn terminal_classification() {
        assert!(EventType::RunFinished.is_run_terminal());
        assert!(EventType::RunCancelled.is_run_terminal());
        assert!(!EventType::IterFinished.is_run_terminal());
    }

    #[test]
    fn high_priority_classification() {
        assert!(!EventType::ModelDelta.is_high_priority());
        assert!(!EventType::ToolStdout.is_high_priority());
        assert!(EventType::ToolFinished.is_high_priority());
        assert!(EventType::RunStarted.is_high_priority());
    }
}
