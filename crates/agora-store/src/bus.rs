//! Relay event bus: live space broadcast plus the recorded run audit trail

use agora_core::{RunEvent, RunId, SpaceEvent, SpaceId};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 1024;

/// Pub/sub port for relay events.
///
/// Space events are fire-and-forget: subscribers that are not listening miss
/// them. Run events are also recorded so the audit trail can be queried later.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_space(&self, space_id: &SpaceId, event: SpaceEvent);

    async fn publish_run(&self, run_id: &RunId, event: RunEvent);

    fn subscribe_space(&self, space_id: &SpaceId) -> broadcast::Receiver<SpaceEvent>;

    /// Every run event as it happens, tagged with its run.
    fn subscribe_runs(&self) -> broadcast::Receiver<(RunId, RunEvent)>;

    /// Recorded events of one run, in publish order.
    async fn run_events(&self, run_id: &RunId) -> Vec<RunEvent>;

    /// Drop the recorded trail of a run (used when a run is rolled back).
    async fn forget_run(&self, run_id: &RunId);
}

pub struct MemoryEventBus {
    spaces: DashMap<SpaceId, broadcast::Sender<SpaceEvent>>,
    runs_tx: broadcast::Sender<(RunId, RunEvent)>,
    run_log: DashMap<RunId, Vec<RunEvent>>,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBus {
    pub fn new() -> Self {
        let (runs_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            spaces: DashMap::new(),
            runs_tx,
            run_log: DashMap::new(),
        }
    }

    fn space_sender(&self, space_id: &SpaceId) -> broadcast::Sender<SpaceEvent> {
        self.spaces
            .entry(space_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryEventBus {
    async fn publish_space(&self, space_id: &SpaceId, event: SpaceEvent) {
        trace!(space = %space_id, event = event.name(), "space event");
        // No subscribers is not an error.
        let _ = self.space_sender(space_id).send(event);
    }

    async fn publish_run(&self, run_id: &RunId, event: RunEvent) {
        trace!(run = %run_id, event = event.name(), "run event");
        self.run_log
            .entry(run_id.clone())
            .or_default()
            .push(event.clone());
        let _ = self.runs_tx.send((run_id.clone(), event));
    }

    fn subscribe_space(&self, space_id: &SpaceId) -> broadcast::Receiver<SpaceEvent> {
        self.space_sender(space_id).subscribe()
    }

    fn subscribe_runs(&self) -> broadcast::Receiver<(RunId, RunEvent)> {
        self.runs_tx.subscribe()
    }

    async fn run_events(&self, run_id: &RunId) -> Vec<RunEvent> {
        self.run_log
            .get(run_id)
            .map(|events| events.value().clone())
            .unwrap_or_default()
    }

    async fn forget_run(&self, run_id: &RunId) {
        self.run_log.remove(run_id);
    }
}
