//! Durable inbox: per-entity blocking FIFO with a status mirror
//!
//! The queue holds event ids in arrival order; the mirror holds every event
//! ever pushed together with its status. Events are never deleted, only
//! transitioned: pending → processing → processed | failed.
//!
//! A consumer blocks in `wait_for_next` on a `Notify`, so there is no
//! polling. Events left in `processing` by a crash are put back in front of
//! the queue by `recover_stuck`.

use agora_core::{EntityId, Error, EventId, InboxEvent, InboxStatus, Result, RunId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a push did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued(EventId),
    /// An unfinished event with the same dedup key already exists.
    Duplicate(EventId),
}

impl PushOutcome {
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::Queued(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Durable blocking queue port.
#[async_trait::async_trait]
pub trait InboxQueue: Send + Sync {
    /// Enqueue and return immediately. Fails loudly if the store is down.
    async fn push(&self, event: InboxEvent) -> Result<PushOutcome>;

    /// Block until the entity has a queued event (`true`) or `cancel`
    /// fires (`false`). Does not dequeue.
    async fn wait_for_next(&self, entity_id: &EntityId, cancel: &CancellationToken)
        -> Result<bool>;

    /// Remove and return every queued event, oldest first. Never blocks.
    async fn drain_all(&self, entity_id: &EntityId) -> Result<Vec<InboxEvent>>;

    /// Number of events queued and not yet drained.
    async fn queued_len(&self, entity_id: &EntityId) -> Result<usize>;

    async fn mark_processing(&self, ids: &[EventId], run_id: &RunId) -> Result<()>;
    async fn mark_processed(&self, ids: &[EventId]) -> Result<()>;
    async fn mark_failed(&self, ids: &[EventId]) -> Result<()>;

    /// Return events to `pending` without queueing them again.
    async fn reset_pending(&self, ids: &[EventId]) -> Result<()>;

    /// Re-queue events a crashed process left in `processing`.
    async fn recover_stuck(&self, entity_id: &EntityId) -> Result<usize>;

    async fn get(&self, id: &EventId) -> Result<Option<InboxEvent>>;

    /// Every event ever pushed for the entity, oldest first.
    async fn list(&self, entity_id: &EntityId) -> Result<Vec<InboxEvent>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Stored {
    seq: u64,
    event: InboxEvent,
}

#[derive(Default)]
struct Lane {
    queue: Mutex<VecDeque<EventId>>,
    notify: Notify,
}

/// In-memory inbox. Survives nothing, but honors the full contract,
/// including an availability switch for exercising store outages.
pub struct MemoryInbox {
    lanes: DashMap<EntityId, Arc<Lane>>,
    events: DashMap<EventId, Stored>,
    seq: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self {
            lanes: DashMap::new(),
            events: DashMap::new(),
            seq: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::store_unavailable("inbox store offline"))
        }
    }

    fn lane(&self, entity_id: &EntityId) -> Arc<Lane> {
        self.lanes
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Lane::default()))
            .clone()
    }

    fn transition(
        &self,
        ids: &[EventId],
        status: InboxStatus,
        run_id: Option<&RunId>,
    ) -> Result<()> {
        self.check_available()?;
        for id in ids {
            let mut stored = self
                .events
                .get_mut(id)
                .ok_or_else(|| Error::not_found("inbox event", id))?;
            stored.event.status = status;
            if let Some(run_id) = run_id {
                stored.event.linked_run_id = Some(run_id.clone());
            }
        }
        Ok(())
    }

    fn entity_events(&self, entity_id: &EntityId) -> Vec<InboxEvent> {
        let mut events: Vec<(u64, InboxEvent)> = self
            .events
            .iter()
            .filter(|s| &s.event.entity_id == entity_id)
            .map(|s| (s.seq, s.event.clone()))
            .collect();
        events.sort_by_key(|(seq, _)| *seq);
        events.into_iter().map(|(_, e)| e).collect()
    }
}

#[async_trait::async_trait]
impl InboxQueue for MemoryInbox {
    async fn push(&self, event: InboxEvent) -> Result<PushOutcome> {
        self.check_available()?;
        let lane = self.lane(&event.entity_id);
        let mut queue = lane.queue.lock().await;

        if let Some(key) = &event.dedup_key {
            let existing = self
                .events
                .iter()
                .find(|s| {
                    s.event.entity_id == event.entity_id
                        && s.event.dedup_key.as_ref() == Some(key)
                        && matches!(
                            s.event.status,
                            InboxStatus::Pending | InboxStatus::Processing
                        )
                })
                .map(|s| s.event.id.clone());
            if let Some(existing) = existing {
                debug!(entity = %event.entity_id, key = %key, "inbox push deduplicated");
                return Ok(PushOutcome::Duplicate(existing));
            }
        }

        let id = event.id.clone();
        let mut event = event;
        event.status = InboxStatus::Pending;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.events.insert(id.clone(), Stored { seq, event });
        queue.push_back(id.clone());
        drop(queue);
        lane.notify.notify_one();
        Ok(PushOutcome::Queued(id))
    }

    async fn wait_for_next(
        &self,
        entity_id: &EntityId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let lane = self.lane(entity_id);
        loop {
            if !lane.queue.lock().await.is_empty() {
                return Ok(true);
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // landing between the check and here still wakes us.
            tokio::select! {
                _ = lane.notify.notified() => {}
                _ = cancel.cancelled() => return Ok(false),
            }
        }
    }

    async fn drain_all(&self, entity_id: &EntityId) -> Result<Vec<InboxEvent>> {
        self.check_available()?;
        let lane = self.lane(entity_id);
        let ids: Vec<EventId> = lane.queue.lock().await.drain(..).collect();
        Ok(ids
            .iter()
            .filter_map(|id| self.events.get(id).map(|s| s.event.clone()))
            .collect())
    }

    async fn queued_len(&self, entity_id: &EntityId) -> Result<usize> {
        Ok(self.lane(entity_id).queue.lock().await.len())
    }

    async fn mark_processing(&self, ids: &[EventId], run_id: &RunId) -> Result<()> {
        self.transition(ids, InboxStatus::Processing, Some(run_id))
    }

    async fn mark_processed(&self, ids: &[EventId]) -> Result<()> {
        self.transition(ids, InboxStatus::Processed, None)
    }

    async fn mark_failed(&self, ids: &[EventId]) -> Result<()> {
        self.transition(ids, InboxStatus::Failed, None)
    }

    async fn reset_pending(&self, ids: &[EventId]) -> Result<()> {
        self.check_available()?;
        for id in ids {
            let mut stored = self
                .events
                .get_mut(id)
                .ok_or_else(|| Error::not_found("inbox event", id))?;
            stored.event.status = InboxStatus::Pending;
            stored.event.linked_run_id = None;
        }
        Ok(())
    }

    async fn recover_stuck(&self, entity_id: &EntityId) -> Result<usize> {
        self.check_available()?;
        let stuck: Vec<EventId> = self
            .entity_events(entity_id)
            .into_iter()
            .filter(|e| e.status == InboxStatus::Processing)
            .map(|e| e.id)
            .collect();
        if stuck.is_empty() {
            return Ok(0);
        }

        self.reset_pending(&stuck).await?;
        let lane = self.lane(entity_id);
        let mut queue = lane.queue.lock().await;
        for id in stuck.iter().rev() {
            queue.push_front(id.clone());
        }
        drop(queue);
        lane.notify.notify_one();
        Ok(stuck.len())
    }

    async fn get(&self, id: &EventId) -> Result<Option<InboxEvent>> {
        Ok(self.events.get(id).map(|s| s.event.clone()))
    }

    async fn list(&self, entity_id: &EntityId) -> Result<Vec<InboxEvent>> {
        Ok(self.entity_events(entity_id))
    }
}
