//! Core types for Agora

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::Arc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            /// Fresh random (UUID v4) identifier.
            pub fn generate() -> Self {
                Self::new(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

string_id!(
    /// Agent or human entity identifier - cheaply cloneable
    EntityId
);
string_id!(
    /// Conversation space identifier
    SpaceId
);
string_id!(EventId);
string_id!(RunId);
string_id!(PlanId);
string_id!(MessageId);
string_id!(ChainId);

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Kind of work an inbox event delivers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InboxEventType {
    SpaceMessage,
    Plan,
    Service,
    ToolResult,
}

impl InboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpaceMessage => "space_message",
            Self::Plan => "plan",
            Self::Service => "service",
            Self::ToolResult => "tool_result",
        }
    }
}

impl std::fmt::Display for InboxEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status mirror of an inbox event, used for crash recovery.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// A post in a space that woke the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpaceMessageTrigger {
    pub space_id: SpaceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub sender_id: EntityId,
    pub sender_kind: MemberKind,
    pub content: String,
    /// Mention chain this delivery belongs to. `None` starts a fresh chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<MentionChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention_reason: Option<String>,
    /// Set when a reply-stack pop hands control back to a waiting agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanTrigger {
    pub plan_id: PlanId,
    pub instruction: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceTrigger {
    pub service_name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of an externally executed tool, delivered back to the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResultTrigger {
    pub run_id: RunId,
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxPayload {
    SpaceMessage(SpaceMessageTrigger),
    Plan(PlanTrigger),
    Service(ServiceTrigger),
    ToolResult(ToolResultTrigger),
}

impl InboxPayload {
    pub fn event_type(&self) -> InboxEventType {
        match self {
            Self::SpaceMessage(_) => InboxEventType::SpaceMessage,
            Self::Plan(_) => InboxEventType::Plan,
            Self::Service(_) => InboxEventType::Service,
            Self::ToolResult(_) => InboxEventType::ToolResult,
        }
    }
}

/// A unit of work delivered to one agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InboxEvent {
    pub id: EventId,
    pub entity_id: EntityId,
    pub payload: InboxPayload,
    pub status: InboxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_run_id: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InboxEvent {
    pub fn new(entity_id: EntityId, payload: InboxPayload) -> Self {
        Self {
            id: EventId::generate(),
            entity_id,
            payload,
            status: InboxStatus::Pending,
            linked_run_id: None,
            dedup_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn event_type(&self) -> InboxEventType {
        self.payload.event_type()
    }

    /// Space message that triggered this event, if any.
    pub fn triggering_message_id(&self) -> Option<&MessageId> {
        match &self.payload {
            InboxPayload::SpaceMessage(m) => m.message_id.as_ref(),
            _ => None,
        }
    }

    pub fn space_id(&self) -> Option<&SpaceId> {
        match &self.payload {
            InboxPayload::SpaceMessage(m) => Some(&m.space_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    WaitingTool,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// What woke the agent for this run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TriggerMetadata {
    pub trigger_type: InboxEventType,
    pub event_ids: Vec<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_id: Option<SpaceId>,
    /// Every space message the batch answers, in batch order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<MentionChain>,
}

/// A tool call that ended the run without a result (client-executed tools).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PendingToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// Audit record of one think-cycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: RunId,
    pub entity_id: EntityId,
    pub status: RunStatus,
    pub trigger: TriggerMetadata,
    pub step_count: u32,
    #[serde(default)]
    pub pending_tool_calls: Vec<PendingToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn new(entity_id: EntityId, trigger: TriggerMetadata) -> Self {
        Self {
            id: RunId::generate(),
            entity_id,
            status: RunStatus::Queued,
            trigger,
            step_count: 0,
            pending_tool_calls: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.finished_at? - self.started_at?).num_milliseconds())
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanSchedule {
    Cron { expression: String },
    Once { run_at: DateTime<Utc> },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Canceled,
}

/// Self-scheduled future work for an agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: PlanId,
    pub entity_id: EntityId,
    pub schedule: PlanSchedule,
    pub instruction: String,
    pub status: PlanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mention chains
// ---------------------------------------------------------------------------

/// An agent waiting for a reply, with the reason it asked.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyFrame {
    pub entity_id: EntityId,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct MentionPair {
    pub caller: EntityId,
    pub callee: EntityId,
}

/// Loop-protected context threaded through agent-to-agent mentions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MentionChain {
    pub chain_id: ChainId,
    pub depth: u32,
    #[serde(default)]
    pub reply_stack: Vec<ReplyFrame>,
    #[serde(default)]
    pub mentioned_pairs: BTreeSet<MentionPair>,
}

impl MentionChain {
    pub fn fresh() -> Self {
        Self {
            chain_id: ChainId::generate(),
            depth: 0,
            reply_stack: Vec::new(),
            mentioned_pairs: BTreeSet::new(),
        }
    }

    pub fn has_pair(&self, caller: &EntityId, callee: &EntityId) -> bool {
        self.mentioned_pairs.contains(&MentionPair {
            caller: caller.clone(),
            callee: callee.clone(),
        })
    }
}

impl Default for MentionChain {
    fn default() -> Self {
        Self::fresh()
    }
}

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Human,
    Agent,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub entity_id: EntityId,
    pub kind: MemberKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// How a human post into a space wakes agents.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    Fanout,
    RoundRobin,
    None,
}

/// A conversation space and its membership.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Space {
    pub id: SpaceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Space {
    pub fn new(id: impl Into<SpaceId>, trigger_mode: TriggerMode) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            trigger_mode,
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, entity_id: impl Into<EntityId>, kind: MemberKind) -> Self {
        self.members.push(Member {
            entity_id: entity_id.into(),
            kind,
            display_name: None,
        });
        self
    }

    pub fn member(&self, entity_id: &EntityId) -> Option<&Member> {
        self.members.iter().find(|m| &m.entity_id == entity_id)
    }

    /// Agent members sorted by id, the order round robin rotates through.
    pub fn agent_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .members
            .iter()
            .filter(|m| m.kind == MemberKind::Agent)
            .map(|m| m.entity_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// A persisted post in a space.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpaceMessage {
    pub id: MessageId,
    pub space_id: SpaceId,
    pub sender_id: EntityId,
    pub sender_kind: MemberKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
}

impl SpaceMessage {
    pub fn new(
        space_id: SpaceId,
        sender_id: EntityId,
        sender_kind: MemberKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            space_id,
            sender_id,
            sender_kind,
            content: content.into(),
            run_id: None,
            created_at: Utc::now(),
        }
    }
}
