//! Mention protocol: who gets woken when something is posted
//!
//! Human posts fan out or rotate per the space's trigger mode. Agent posts
//! only wake the agent they explicitly mention, and only when the chain's
//! loop guards allow it. Each accepted mention deepens the chain; with
//! `expect_reply` the caller is pushed on the reply stack and resumed when
//! the callee finishes a cycle without mentioning anyone.

use crate::config::MentionConfig;
use agora_core::{
    EntityId, InboxEvent, InboxPayload, MemberKind, MentionChain, MentionPair, ReplyFrame,
    Result, SpaceId, SpaceMessage, SpaceMessageTrigger,
};
use agora_store::{InboxQueue, RunStore, SpaceDirectory};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a mention was refused. Never surfaced to the calling agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MentionRejection {
    DepthExceeded { depth: u32 },
    SelfMention,
    DuplicatePair,
    NotAgentMember,
    /// The callee already has a run for this message.
    AlreadyHandled,
}

impl std::fmt::Display for MentionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DepthExceeded { depth } => write!(f, "chain depth {depth} reached"),
            Self::SelfMention => f.write_str("agent mentioned itself"),
            Self::DuplicatePair => f.write_str("pair already mentioned in this chain"),
            Self::NotAgentMember => f.write_str("callee is not an agent member of the space"),
            Self::AlreadyHandled => f.write_str("callee already handled this message"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MentionOutcome {
    Triggered { callee: EntityId, chain: MentionChain },
    Rejected(MentionRejection),
}

impl MentionOutcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// An agent-to-agent mention, as requested during a finished cycle.
#[derive(Clone, Debug)]
pub struct Mention<'a> {
    pub chain: &'a MentionChain,
    pub caller: &'a EntityId,
    pub callee: &'a EntityId,
    pub reason: &'a str,
    pub expect_reply: bool,
    pub message: &'a SpaceMessage,
}

fn message_dedup_key(message: &SpaceMessage) -> String {
    format!("msg:{}", message.id)
}

#[derive(Clone)]
pub struct MentionProtocol {
    inbox: Arc<dyn InboxQueue>,
    spaces: Arc<dyn SpaceDirectory>,
    runs: Arc<dyn RunStore>,
    config: MentionConfig,
}

impl MentionProtocol {
    pub fn new(
        inbox: Arc<dyn InboxQueue>,
        spaces: Arc<dyn SpaceDirectory>,
        runs: Arc<dyn RunStore>,
        config: MentionConfig,
    ) -> Self {
        Self {
            inbox,
            spaces,
            runs,
            config,
        }
    }

    pub fn config(&self) -> &MentionConfig {
        &self.config
    }

    /// Deliver a message to one agent unless it already ran for it.
    async fn deliver(
        &self,
        entity_id: &EntityId,
        message: &SpaceMessage,
        chain: MentionChain,
        mention_reason: Option<String>,
    ) -> Result<bool> {
        if self.runs.has_run_for_message(entity_id, &message.id).await? {
            debug!(entity = %entity_id, message = %message.id, "already handled, not delivered");
            return Ok(false);
        }
        let event = InboxEvent::new(
            entity_id.clone(),
            InboxPayload::SpaceMessage(SpaceMessageTrigger {
                space_id: message.space_id.clone(),
                message_id: Some(message.id.clone()),
                sender_id: message.sender_id.clone(),
                sender_kind: message.sender_kind,
                content: message.content.clone(),
                chain: Some(chain),
                mention_reason,
                resume_reason: None,
            }),
        )
        .with_dedup_key(message_dedup_key(message));
        Ok(!self.inbox.push(event).await?.is_duplicate())
    }

    /// Wake every agent member except the sender, each on a fresh chain.
    pub async fn trigger_fanout(&self, message: &SpaceMessage) -> Result<Vec<EntityId>> {
        let Some(space) = self.spaces.get(&message.space_id).await? else {
            return Ok(Vec::new());
        };
        let mut woken = Vec::new();
        for agent in space.agent_ids() {
            if agent == message.sender_id {
                continue;
            }
            if self.deliver(&agent, message, MentionChain::fresh(), None).await? {
                woken.push(agent);
            }
        }
        debug!(space = %space.id, woken = woken.len(), "fanout");
        Ok(woken)
    }

    /// Wake the next agent in the space's rotation.
    pub async fn trigger_round_robin(&self, message: &SpaceMessage) -> Result<Option<EntityId>> {
        let Some(space) = self.spaces.get(&message.space_id).await? else {
            return Ok(None);
        };
        let candidates: Vec<EntityId> = space
            .agent_ids()
            .into_iter()
            .filter(|a| a != &message.sender_id)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let turn = self.spaces.next_round_robin(&space.id).await?;
        let agent = candidates[(turn % candidates.len() as u64) as usize].clone();
        self.deliver(&agent, message, MentionChain::fresh(), None)
            .await
            .map(|delivered| delivered.then_some(agent))
    }

    /// Apply the loop guards and, if they pass, wake the callee.
    pub async fn mention(&self, m: Mention<'_>) -> Result<MentionOutcome> {
        let rejection = if m.chain.depth >= self.config.max_depth {
            Some(MentionRejection::DepthExceeded {
                depth: m.chain.depth,
            })
        } else if m.caller == m.callee {
            Some(MentionRejection::SelfMention)
        } else if m.chain.has_pair(m.caller, m.callee) {
            Some(MentionRejection::DuplicatePair)
        } else if !self
            .spaces
            .is_agent_member(&m.message.space_id, m.callee)
            .await?
        {
            Some(MentionRejection::NotAgentMember)
        } else {
            None
        };
        if let Some(rejection) = rejection {
            debug!(caller = %m.caller, callee = %m.callee, "mention rejected: {}", rejection);
            return Ok(MentionOutcome::Rejected(rejection));
        }

        let mut chain = m.chain.clone();
        chain.depth += 1;
        chain.mentioned_pairs.insert(MentionPair {
            caller: m.caller.clone(),
            callee: m.callee.clone(),
        });
        if m.expect_reply {
            if chain.reply_stack.len() < self.config.max_reply_stack {
                chain.reply_stack.push(ReplyFrame {
                    entity_id: m.caller.clone(),
                    reason: m.reason.to_string(),
                });
            } else {
                info!(caller = %m.caller, "reply stack full, caller will not be resumed");
            }
        }

        let delivered = self
            .deliver(m.callee, m.message, chain.clone(), Some(m.reason.to_string()))
            .await?;
        if !delivered {
            return Ok(MentionOutcome::Rejected(MentionRejection::AlreadyHandled));
        }
        info!(
            caller = %m.caller,
            callee = %m.callee,
            depth = chain.depth,
            chain = %chain.chain_id,
            "mention delivered"
        );
        Ok(MentionOutcome::Triggered {
            callee: m.callee.clone(),
            chain,
        })
    }

    /// The finishing agent mentioned no one: hand control back to whoever is
    /// waiting on top of the reply stack. Returns the resumed agent.
    pub async fn pop_reply_on_silence(
        &self,
        chain: &MentionChain,
        finishing: &EntityId,
        space_id: &SpaceId,
        reply: Option<&SpaceMessage>,
    ) -> Result<Option<EntityId>> {
        if chain.reply_stack.is_empty() {
            return Ok(None);
        }
        if chain.depth >= self.config.max_depth {
            info!(chain = %chain.chain_id, "chain depth reached, reply stack abandoned");
            return Ok(None);
        }
        let mut chain = chain.clone();
        let Some(frame) = chain.reply_stack.pop() else {
            return Ok(None);
        };
        chain.depth += 1;
        let dedup = format!("resume:{}:{}", chain.chain_id, chain.depth);
        let event = InboxEvent::new(
            frame.entity_id.clone(),
            InboxPayload::SpaceMessage(SpaceMessageTrigger {
                space_id: reply.map_or_else(|| space_id.clone(), |r| r.space_id.clone()),
                message_id: reply.map(|r| r.id.clone()),
                sender_id: finishing.clone(),
                sender_kind: MemberKind::Agent,
                content: reply.map_or_else(|| "(no reply posted)".to_string(), |r| r.content.clone()),
                chain: Some(chain),
                mention_reason: None,
                resume_reason: Some(frame.reason),
            }),
        )
        .with_dedup_key(dedup);
        self.inbox.push(event).await?;
        info!(resumed = %frame.entity_id, after = %finishing, "reply stack popped");
        Ok(Some(frame.entity_id))
    }
}
