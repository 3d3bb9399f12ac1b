//! Relay protocol: events broadcast to space subscribers and run auditors
//!
//! Wire format (one JSON object per event):
//!
//!   { "event": "message.stream.delta", "data": { "streamId": "call_1", "delta": "Hel" } }
//!
//! Two channels exist:
//!   - space channel: everything a member of the space may watch live
//!   - run channel: the audit trail of one think-cycle

use crate::types::{EntityId, InboxEventType, RunId, RunStatus, SpaceMessage};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Space channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SpaceEvent {
    /// A persisted post.
    #[serde(rename = "space.message")]
    Message { message: SpaceMessage },

    /// Live relay of a message still being written by an agent.
    #[serde(rename = "message.stream.start", rename_all = "camelCase")]
    StreamStart {
        stream_id: String,
        entity_id: EntityId,
        run_id: RunId,
    },

    #[serde(rename = "message.stream.delta", rename_all = "camelCase")]
    StreamDelta { stream_id: String, delta: String },

    #[serde(rename = "message.stream.end", rename_all = "camelCase")]
    StreamEnd { stream_id: String },

    #[serde(rename = "tool.error", rename_all = "camelCase")]
    ToolError {
        run_id: RunId,
        tool_call_id: String,
        tool_name: String,
        error: String,
    },

    #[serde(rename = "agent.active", rename_all = "camelCase")]
    AgentActive { entity_id: EntityId, run_id: RunId },

    #[serde(rename = "agent.inactive", rename_all = "camelCase")]
    AgentInactive { entity_id: EntityId, run_id: RunId },
}

impl SpaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "space.message",
            Self::StreamStart { .. } => "message.stream.start",
            Self::StreamDelta { .. } => "message.stream.delta",
            Self::StreamEnd { .. } => "message.stream.end",
            Self::ToolError { .. } => "tool.error",
            Self::AgentActive { .. } => "agent.active",
            Self::AgentInactive { .. } => "agent.inactive",
        }
    }
}

// ---------------------------------------------------------------------------
// Run channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "run.started", rename_all = "camelCase")]
    Started {
        entity_id: EntityId,
        trigger_type: InboxEventType,
    },

    #[serde(rename = "reasoning.start")]
    ReasoningStart { id: String },

    #[serde(rename = "reasoning.delta")]
    ReasoningDelta { id: String, text: String },

    #[serde(rename = "reasoning.end")]
    ReasoningEnd { id: String },

    #[serde(rename = "tool.started", rename_all = "camelCase")]
    ToolStarted {
        tool_call_id: String,
        tool_name: String,
    },

    #[serde(rename = "tool.input.delta", rename_all = "camelCase")]
    ToolInputDelta { tool_call_id: String, delta: String },

    #[serde(rename = "tool.call", rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool.result", rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
    },

    #[serde(rename = "tool.error", rename_all = "camelCase")]
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },

    #[serde(rename = "step.finish", rename_all = "camelCase")]
    StepFinish {
        step: u32,
        input_tokens: u64,
        output_tokens: u64,
    },

    #[serde(rename = "run.finished")]
    Finished { status: RunStatus },

    #[serde(rename = "run.failed")]
    Failed { error: String },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "run.started",
            Self::ReasoningStart { .. } => "reasoning.start",
            Self::ReasoningDelta { .. } => "reasoning.delta",
            Self::ReasoningEnd { .. } => "reasoning.end",
            Self::ToolStarted { .. } => "tool.started",
            Self::ToolInputDelta { .. } => "tool.input.delta",
            Self::ToolCall { .. } => "tool.call",
            Self::ToolResult { .. } => "tool.result",
            Self::ToolError { .. } => "tool.error",
            Self::StepFinish { .. } => "step.finish",
            Self::Finished { .. } => "run.finished",
            Self::Failed { .. } => "run.failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Serialized event as pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn space(event: &SpaceEvent) -> Self {
        Self::new(
            event.name(),
            serde_json::to_value(event).unwrap_or_default(),
        )
    }

    pub fn run(event: &RunEvent) -> Self {
        Self::new(
            event.name(),
            serde_json::to_value(event).unwrap_or_default(),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
