//! Per-cycle tool context
//!
//! One `ToolContext` lives for exactly one think-cycle. It carries the
//! agent's identity, the stores tools may touch, and the cycle's effects:
//! the active space pointer, posts made, mentions requested, and whether
//! the agent chose to skip.

use agora_core::{EntityId, MessageId, RunId, SpaceId, SpaceMessage};
use agora_store::{EventBus, PlanStore, SpaceDirectory, SpaceLog};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Stores shared by every cycle of every agent.
#[derive(Clone)]
pub struct ToolServices {
    pub spaces: Arc<dyn SpaceDirectory>,
    pub log: Arc<dyn SpaceLog>,
    pub bus: Arc<dyn EventBus>,
    pub plans: Arc<dyn PlanStore>,
}

/// A mention an agent attached to one of its posts.
#[derive(Clone, Debug, PartialEq)]
pub struct MentionRequest {
    pub space_id: SpaceId,
    pub message_id: MessageId,
    pub callee: EntityId,
    pub reason: String,
    pub expect_reply: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CycleEffects {
    pub active_space: Option<SpaceId>,
    pub posts: Vec<SpaceMessage>,
    pub mentions: Vec<MentionRequest>,
    pub skipped: bool,
}

pub struct ToolContext {
    pub entity_id: EntityId,
    pub run_id: RunId,
    pub services: ToolServices,
    effects: Mutex<CycleEffects>,
}

impl ToolContext {
    pub fn new(
        entity_id: EntityId,
        run_id: RunId,
        services: ToolServices,
        active_space: Option<SpaceId>,
    ) -> Self {
        Self {
            entity_id,
            run_id,
            services,
            effects: Mutex::new(CycleEffects {
                active_space,
                ..Default::default()
            }),
        }
    }

    pub async fn active_space(&self) -> Option<SpaceId> {
        self.effects.lock().await.active_space.clone()
    }

    pub async fn set_active_space(&self, space_id: SpaceId) {
        self.effects.lock().await.active_space = Some(space_id);
    }

    pub async fn record_post(&self, message: SpaceMessage) {
        self.effects.lock().await.posts.push(message);
    }

    pub async fn record_mention(&self, mention: MentionRequest) {
        self.effects.lock().await.mentions.push(mention);
    }

    pub async fn mark_skipped(&self) {
        self.effects.lock().await.skipped = true;
    }

    /// Snapshot of everything the cycle did so far.
    pub async fn effects(&self) -> CycleEffects {
        self.effects.lock().await.clone()
    }
}
