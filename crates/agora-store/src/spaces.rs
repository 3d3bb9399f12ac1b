//! Space directory (membership, trigger mode, round-robin cursor) and space log

use agora_core::{
    EntityId, Error, Member, MemberKind, MessageId, Result, Space, SpaceId, SpaceMessage,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait SpaceDirectory: Send + Sync {
    async fn get(&self, space_id: &SpaceId) -> Result<Option<Space>>;

    /// Insert or replace a space. Keeps any existing round-robin cursor.
    async fn upsert(&self, space: Space) -> Result<()>;

    async fn add_member(&self, space_id: &SpaceId, member: Member) -> Result<()>;

    /// Spaces the entity belongs to, sorted by id.
    async fn spaces_of(&self, entity_id: &EntityId) -> Result<Vec<SpaceId>>;

    /// Atomically read and advance the space's round-robin cursor.
    async fn next_round_robin(&self, space_id: &SpaceId) -> Result<u64>;

    async fn is_agent_member(&self, space_id: &SpaceId, entity_id: &EntityId) -> Result<bool> {
        Ok(self
            .get(space_id)
            .await?
            .and_then(|s| s.member(entity_id).map(|m| m.kind == MemberKind::Agent))
            .unwrap_or(false))
    }

    async fn is_member(&self, space_id: &SpaceId, entity_id: &EntityId) -> Result<bool> {
        Ok(self
            .get(space_id)
            .await?
            .map(|s| s.member(entity_id).is_some())
            .unwrap_or(false))
    }
}

#[derive(Default)]
pub struct MemorySpaceDirectory {
    spaces: DashMap<SpaceId, Space>,
    cursors: DashMap<SpaceId, Arc<AtomicU64>>,
}

impl MemorySpaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spaces(spaces: impl IntoIterator<Item = Space>) -> Self {
        let dir = Self::new();
        for space in spaces {
            dir.spaces.insert(space.id.clone(), space);
        }
        dir
    }
}

#[async_trait::async_trait]
impl SpaceDirectory for MemorySpaceDirectory {
    async fn get(&self, space_id: &SpaceId) -> Result<Option<Space>> {
        Ok(self.spaces.get(space_id).map(|s| s.value().clone()))
    }

    async fn upsert(&self, space: Space) -> Result<()> {
        self.spaces.insert(space.id.clone(), space);
        Ok(())
    }

    async fn add_member(&self, space_id: &SpaceId, member: Member) -> Result<()> {
        let mut space = self
            .spaces
            .get_mut(space_id)
            .ok_or_else(|| Error::not_found("space", space_id))?;
        space.members.retain(|m| m.entity_id != member.entity_id);
        space.members.push(member);
        Ok(())
    }

    async fn spaces_of(&self, entity_id: &EntityId) -> Result<Vec<SpaceId>> {
        let mut ids: Vec<SpaceId> = self
            .spaces
            .iter()
            .filter(|s| s.member(entity_id).is_some())
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn next_round_robin(&self, space_id: &SpaceId) -> Result<u64> {
        if !self.spaces.contains_key(space_id) {
            return Err(Error::not_found("space", space_id));
        }
        let cursor = self
            .cursors
            .entry(space_id.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        Ok(cursor.fetch_add(1, Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Space log
// ---------------------------------------------------------------------------

/// Append-only store of persisted posts.
#[async_trait::async_trait]
pub trait SpaceLog: Send + Sync {
    async fn append(&self, message: SpaceMessage) -> Result<()>;

    async fn get(&self, id: &MessageId) -> Result<Option<SpaceMessage>>;

    /// The most recent `limit` posts of a space, oldest first.
    async fn recent(&self, space_id: &SpaceId, limit: usize) -> Result<Vec<SpaceMessage>>;
}

#[derive(Default)]
pub struct MemorySpaceLog {
    by_space: DashMap<SpaceId, Vec<SpaceMessage>>,
    index: DashMap<MessageId, SpaceId>,
}

impl MemorySpaceLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SpaceLog for MemorySpaceLog {
    async fn append(&self, message: SpaceMessage) -> Result<()> {
        self.index
            .insert(message.id.clone(), message.space_id.clone());
        self.by_space
            .entry(message.space_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn get(&self, id: &MessageId) -> Result<Option<SpaceMessage>> {
        let Some(space_id) = self.index.get(id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .by_space
            .get(&space_id)
            .and_then(|msgs| msgs.iter().find(|m| &m.id == id).cloned()))
    }

    async fn recent(&self, space_id: &SpaceId, limit: usize) -> Result<Vec<SpaceMessage>> {
        Ok(self
            .by_space
            .get(space_id)
            .map(|msgs| {
                let start = msgs.len().saturating_sub(limit);
                msgs[start..].to_vec()
            })
            .unwrap_or_default())
    }
}
