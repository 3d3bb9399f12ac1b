//! Run and plan record stores

use agora_core::{
    EntityId, Error, MessageId, Plan, PlanId, PlanStatus, Result, Run, RunId, RunStatus,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

/// Query for `RunStore::list`.
#[derive(Clone, Debug, Default)]
pub struct RunFilter {
    pub entity_id: Option<EntityId>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn for_entity(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    fn matches(&self, run: &Run) -> bool {
        self.entity_id.as_ref().map_or(true, |e| &run.entity_id == e)
            && self.status.map_or(true, |s| run.status == s)
    }
}

/// Audit record store for runs.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run. Rejected with `InvalidState` when a non-canceled run
    /// already exists for the same agent and any of its triggering messages.
    async fn create(&self, run: Run) -> Result<()>;

    async fn get(&self, id: &RunId) -> Result<Option<Run>>;

    /// Replace an existing run wholesale.
    async fn update(&self, run: Run) -> Result<()>;

    async fn delete(&self, id: &RunId) -> Result<()>;

    /// Matching runs, newest first.
    async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    /// Whether a non-canceled run already handled (or is handling) this message.
    async fn has_run_for_message(&self, entity_id: &EntityId, message_id: &MessageId)
        -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: DashMap<RunId, Run>,
    // serializes the dedup check with the insert
    create_lock: Mutex<()>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn message_taken(&self, entity_id: &EntityId, message_id: &MessageId) -> bool {
        self.runs.iter().any(|r| {
            &r.entity_id == entity_id
                && r.status != RunStatus::Canceled
                && r.trigger.message_ids.contains(message_id)
        })
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, run: Run) -> Result<()> {
        let _guard = self.create_lock.lock().await;
        for message_id in &run.trigger.message_ids {
            if self.message_taken(&run.entity_id, message_id) {
                return Err(Error::invalid_state(format!(
                    "run already exists for {} on message {}",
                    run.entity_id, message_id
                )));
            }
        }
        if self.runs.contains_key(&run.id) {
            return Err(Error::invalid_state(format!("run {} already exists", run.id)));
        }
        self.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self.runs.get(id).map(|r| r.value().clone()))
    }

    async fn update(&self, run: Run) -> Result<()> {
        let mut slot = self
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| Error::not_found("run", &run.id))?;
        *slot = run;
        Ok(())
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        self.runs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("run", id))
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn has_run_for_message(
        &self,
        entity_id: &EntityId,
        message_id: &MessageId,
    ) -> Result<bool> {
        Ok(self.message_taken(entity_id, message_id))
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait PlanStore: Send + Sync {
    /// Insert or replace by id.
    async fn upsert(&self, plan: Plan) -> Result<()>;

    async fn get(&self, id: &PlanId) -> Result<Option<Plan>>;

    /// Every plan of the entity, oldest first.
    async fn list(&self, entity_id: &EntityId) -> Result<Vec<Plan>>;

    /// Pending plans whose `next_run_at` is at or before `now`.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Plan>>;
}

#[derive(Default)]
pub struct MemoryPlanStore {
    plans: DashMap<PlanId, Plan>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PlanStore for MemoryPlanStore {
    async fn upsert(&self, plan: Plan) -> Result<()> {
        self.plans.insert(plan.id.clone(), plan);
        Ok(())
    }

    async fn get(&self, id: &PlanId) -> Result<Option<Plan>> {
        Ok(self.plans.get(id).map(|p| p.value().clone()))
    }

    async fn list(&self, entity_id: &EntityId) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| &p.entity_id == entity_id)
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| {
                p.status == PlanStatus::Pending && p.next_run_at.map_or(false, |at| at <= now)
            })
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by_key(|p| p.next_run_at);
        Ok(plans)
    }
}
