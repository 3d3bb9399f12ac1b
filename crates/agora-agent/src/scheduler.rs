//! Plan scheduler: turns due plans into `plan` inbox events

use agora_core::{InboxEvent, InboxPayload, Plan, PlanSchedule, PlanStatus, PlanTrigger, Result};
use agora_store::{InboxQueue, PlanStore};
use agora_tools::next_run_after;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct PlanScheduler {
    plans: Arc<dyn PlanStore>,
    inbox: Arc<dyn InboxQueue>,
    tick: Duration,
}

impl PlanScheduler {
    pub fn new(plans: Arc<dyn PlanStore>, inbox: Arc<dyn InboxQueue>, tick: Duration) -> Self {
        Self { plans, inbox, tick }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("plan tick failed: {}", e);
                    }
                }
            }
        }
        debug!("plan scheduler stopped");
    }

    /// Fire every plan due at `now`. Returns how many fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.plans.due(now).await?;
        let mut fired = 0;
        for plan in due {
            if plan.status != PlanStatus::Pending {
                continue;
            }
            match self.fire(plan, now).await {
                Ok(()) => fired += 1,
                Err(e) => warn!("plan could not fire: {}", e),
            }
        }
        Ok(fired)
    }

    async fn fire(&self, mut plan: Plan, now: DateTime<Utc>) -> Result<()> {
        let scheduled = plan.next_run_at;
        plan.status = PlanStatus::Running;
        self.plans.upsert(plan.clone()).await?;

        let key = format!(
            "plan:{}:{}",
            plan.id,
            scheduled.map(|t| t.timestamp()).unwrap_or_default()
        );
        let event = InboxEvent::new(
            plan.entity_id.clone(),
            InboxPayload::Plan(PlanTrigger {
                plan_id: plan.id.clone(),
                instruction: plan.instruction.clone(),
            }),
        )
        .with_dedup_key(key);
        if let Err(e) = self.inbox.push(event).await {
            // back to pending so the next tick retries
            plan.status = PlanStatus::Pending;
            self.plans.upsert(plan).await?;
            return Err(e);
        }

        plan.last_run_at = Some(now);
        match &plan.schedule {
            PlanSchedule::Once { .. } => {
                plan.status = PlanStatus::Completed;
                plan.next_run_at = None;
            }
            PlanSchedule::Cron { .. } => match next_run_after(&plan.schedule, now) {
                Ok(next) => {
                    plan.status = PlanStatus::Pending;
                    plan.next_run_at = next;
                }
                Err(e) => {
                    warn!(plan = %plan.id, "cannot reschedule, canceling: {}", e);
                    plan.status = PlanStatus::Canceled;
                    plan.next_run_at = None;
                }
            },
        }
        info!(
            plan = %plan.id,
            entity = %plan.entity_id,
            next = ?plan.next_run_at,
            "plan fired"
        );
        self.plans.upsert(plan).await
    }
}
