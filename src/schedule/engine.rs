use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::database::executions::TriggerType;
use crate::database::task_groups;
use crate::database::tasks::{self, ScheduleType, TaskStatus};
use crate::error::{is_unique_violation, ObserverError, Result};
use crate::execution::LifecycleService;
use crate::schedule::{evaluator, window};

const INSERT_RETRY_ATTEMPTS: u32 = 3;
const INSERT_RETRY_BACKOFF_MS: u64 = 100;
const REQUEUE_DELAY_SECS: i64 = 1;

// Upper bound on the idle wait; registrations wake the loop early anyway.
const IDLE_WAIT_SECS: u64 = 3600;

/// A firing waiting in the heap. `fire_at` is the schedule instant that
/// becomes the execution's `scheduled_at`; `due_at` is when the loop should
/// process it (they differ only after a transient-failure requeue).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct FiringEntry {
    due_at: DateTime<Utc>,
    task_id: Uuid,
    fire_at: DateTime<Utc>,
}

struct EngineInner {
    heap: BinaryHeap<Reverse<FiringEntry>>,
    /// Source of truth for live registrations; heap entries that disagree are
    /// stale and skipped on pop.
    registered: HashMap<Uuid, (DateTime<Utc>, DateTime<Utc>)>, // task -> (due_at, fire_at)
    /// (cron, timezone) fingerprints so the periodic sync can detect edits.
    configs: HashMap<Uuid, (String, String)>,
}

/// For every ACTIVE task, keeps exactly one upcoming firing in a min-heap and
/// turns due firings into PENDING executions on one cooperative loop. The
/// heap and cache sit behind a single mutex that is never held across
/// persistence I/O.
pub struct ScheduleEngine {
    db: Arc<DatabaseConnection>,
    lifecycle: Arc<LifecycleService>,
    inner: Mutex<EngineInner>,
    notify: Notify,
    sync_interval_secs: u64,
}

impl ScheduleEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        lifecycle: Arc<LifecycleService>,
        sync_interval_secs: u64,
    ) -> Self {
        Self {
            db,
            lifecycle,
            inner: Mutex::new(EngineInner {
                heap: BinaryHeap::new(),
                registered: HashMap::new(),
                configs: HashMap::new(),
            }),
            notify: Notify::new(),
            sync_interval_secs,
        }
    }

    /// Register (or re-register) a task, computing its next firing strictly
    /// after `now`. Idempotent: an existing registration is replaced.
    pub async fn register(&self, task: &tasks::Model) -> Result<()> {
        self.register_from(task, Utc::now()).await
    }

    /// Same as `register` but computes the next firing strictly after the
    /// given instant. The tick path uses the previous firing here so that
    /// closely spaced fires are never skipped.
    pub async fn register_from(&self, task: &tasks::Model, after: DateTime<Utc>) -> Result<()> {
        if TaskStatus::from(task.status.clone()) != TaskStatus::Active {
            self.unregister(task.id).await;
            return Ok(());
        }

        let cron_expr = task.schedule_config.cron_expression.as_deref().ok_or_else(|| {
            ObserverError::Validation(format!(
                "Task {} is active but has no cron expression",
                task.id
            ))
        })?;

        let next = evaluator::next_after(cron_expr, &task.schedule_config.timezone, after)?;
        let fingerprint = (
            cron_expr.to_string(),
            task.schedule_config.timezone.clone(),
        );

        let mut inner = self.inner.lock().await;
        inner.registered.insert(task.id, (next, next));
        inner.configs.insert(task.id, fingerprint);
        inner.heap.push(Reverse(FiringEntry {
            due_at: next,
            task_id: task.id,
            fire_at: next,
        }));
        drop(inner);

        self.notify.notify_one();
        tracing::debug!(task_id = %task.id, next_firing = %next, "Registered task");
        Ok(())
    }

    /// Safe when no registration exists.
    pub async fn unregister(&self, task_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let removed = inner.registered.remove(&task_id).is_some();
        inner.configs.remove(&task_id);
        drop(inner);

        if removed {
            self.notify.notify_one();
            tracing::debug!(task_id = %task_id, "Unregistered task");
        }
    }

    /// Upcoming firing instant for a registered task, if any.
    pub async fn next_firing(&self, task_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .await
            .registered
            .get(&task_id)
            .map(|(_, fire_at)| *fire_at)
    }

    pub async fn registered_count(&self) -> usize {
        self.inner.lock().await.registered.len()
    }

    /// Synthesize a MANUAL execution immediately, bypassing the schedule but
    /// not the status gate.
    pub async fn trigger_manual(
        &self,
        task_id: Uuid,
        caller: &str,
    ) -> Result<crate::database::executions::Model> {
        let task = tasks::Entity::find_by_id(task_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ObserverError::TaskNotFound(task_id.to_string()))?;

        if TaskStatus::from(task.status.clone()) != TaskStatus::Active {
            return Err(ObserverError::TaskNotActive(task_id.to_string()));
        }

        tracing::info!(task_id = %task_id, caller = %caller, "Manual trigger");
        self.lifecycle
            .create_execution(&task, TriggerType::Manual, Utc::now())
            .await
    }

    /// Register every ACTIVE task. Firings missed while the service was down
    /// are skipped; the next firing is computed from now.
    pub async fn restore_from_database(&self) -> Result<usize> {
        let active = tasks::Entity::find()
            .filter(tasks::Column::Status.eq(TaskStatus::Active.to_string()))
            .all(&*self.db)
            .await?;

        let mut restored = 0;
        for task in active {
            match self.register(&task).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::error!(task_id = %task.id, "Failed to restore task registration: {}", e);
                }
            }
        }

        tracing::info!("Schedule restoration complete: {} tasks registered", restored);
        Ok(restored)
    }

    /// Reconcile registrations against the task table: pick up tasks created
    /// or edited outside this process, drop ones no longer active. Safety net
    /// behind the event-driven register/unregister calls.
    pub async fn sync_registrations(&self) -> Result<()> {
        let active = tasks::Entity::find()
            .filter(tasks::Column::Status.eq(TaskStatus::Active.to_string()))
            .all(&*self.db)
            .await?;

        let mut active_ids = HashSet::new();
        for task in active {
            active_ids.insert(task.id);

            let fingerprint = (
                task.schedule_config
                    .cron_expression
                    .clone()
                    .unwrap_or_default(),
                task.schedule_config.timezone.clone(),
            );
            let needs_register = {
                let inner = self.inner.lock().await;
                match (inner.registered.get(&task.id), inner.configs.get(&task.id)) {
                    (Some(_), Some(existing)) => existing != &fingerprint,
                    _ => true,
                }
            };

            if needs_register {
                if let Err(e) = self.register(&task).await {
                    tracing::warn!(task_id = %task.id, "Failed to sync registration: {}", e);
                }
            }
        }

        let stale: Vec<Uuid> = {
            let inner = self.inner.lock().await;
            inner
                .registered
                .keys()
                .filter(|id| !active_ids.contains(id))
                .copied()
                .collect()
        };
        for task_id in stale {
            self.unregister(task_id).await;
        }

        Ok(())
    }

    /// Process every firing due at `now`, in (due_at, task uuid) order.
    /// Returns the number of executions created. Failures are contained per
    /// task; one bad task never blocks the rest of the tick.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = {
            let mut inner = self.inner.lock().await;
            let mut due = Vec::new();
            while let Some(Reverse(entry)) = inner.heap.peek() {
                if entry.due_at > now {
                    break;
                }
                let Reverse(entry) = inner.heap.pop().expect("peeked entry vanished");
                match inner.registered.get(&entry.task_id) {
                    Some((due_at, _)) if *due_at == entry.due_at => {
                        inner.registered.remove(&entry.task_id);
                        due.push(entry);
                    }
                    _ => {} // stale entry from a replaced or removed registration
                }
            }
            due
        };

        let mut created = 0;
        for entry in due {
            match self.fire(&entry, now).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        task_id = %entry.task_id,
                        fire_at = %entry.fire_at,
                        "Dropping firing after unrecoverable error: {}",
                        e
                    );
                }
            }
        }

        Ok(created)
    }

    /// Handle one due firing: reload the task row (the heap entry may be
    /// stale), apply status and gating rules, create the PENDING execution,
    /// and queue the next firing strictly after this one.
    async fn fire(&self, entry: &FiringEntry, now: DateTime<Utc>) -> Result<bool> {
        let Some(task) = tasks::Entity::find_by_id(entry.task_id).one(&*self.db).await? else {
            // Deleted since registration; nothing to reschedule.
            return Ok(false);
        };

        if TaskStatus::from(task.status.clone()) != TaskStatus::Active {
            tracing::debug!(task_id = %task.id, status = %task.status, "Skipping firing for inactive task");
            return Ok(false);
        }

        let mut gated = false;
        if let Some(group_id) = task.task_group_id {
            if let Some(group) = task_groups::Entity::find_by_id(group_id)
                .one(&*self.db)
                .await?
            {
                if !window::group_is_running(&group, entry.fire_at)? {
                    gated = true;
                }
            }
        }
        if !gated && !window::schedule_gates_pass(&task.schedule_config, entry.fire_at)? {
            gated = true;
        }

        let mut created = false;
        if gated {
            tracing::debug!(
                task_id = %task.id,
                fire_at = %entry.fire_at,
                "Firing gated by window/exclusions, rescheduling"
            );
        } else {
            match self.create_with_retry(&task, entry.fire_at).await {
                Ok(()) => created = true,
                Err(ObserverError::Conflict(msg)) => {
                    tracing::warn!(task_id = %task.id, "Duplicate firing dropped: {}", msg);
                }
                Err(e) => {
                    // Transient persistence trouble: retry this same firing
                    // shortly without advancing the schedule.
                    tracing::warn!(
                        task_id = %task.id,
                        fire_at = %entry.fire_at,
                        "Execution insert failed, requeueing firing: {}",
                        e
                    );
                    let retry_at = now + ChronoDuration::seconds(REQUEUE_DELAY_SECS);
                    let mut inner = self.inner.lock().await;
                    inner.registered.insert(task.id, (retry_at, entry.fire_at));
                    inner.heap.push(Reverse(FiringEntry {
                        due_at: retry_at,
                        task_id: task.id,
                        fire_at: entry.fire_at,
                    }));
                    drop(inner);
                    self.notify.notify_one();
                    return Ok(false);
                }
            }
        }

        if ScheduleType::from(task.schedule_type.clone()) == ScheduleType::Oneoff {
            self.disable_oneoff(&task).await?;
            return Ok(created);
        }

        self.register_from(&task, entry.fire_at).await?;
        Ok(created)
    }

    async fn create_with_retry(&self, task: &tasks::Model, fire_at: DateTime<Utc>) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=INSERT_RETRY_ATTEMPTS {
            match self
                .lifecycle
                .create_execution(task, TriggerType::Scheduled, fire_at)
                .await
            {
                Ok(_) => return Ok(()),
                Err(ObserverError::Database(e)) if is_unique_violation(&e) => {
                    return Err(ObserverError::Conflict(format!(
                        "execution for task {} at {} already exists",
                        task.id, fire_at
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        attempt = attempt,
                        "Execution insert attempt failed: {}",
                        e
                    );
                    last_err = Some(e);
                    if attempt < INSERT_RETRY_ATTEMPTS {
                        tokio::time::sleep(tokio::time::Duration::from_millis(
                            INSERT_RETRY_BACKOFF_MS,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ObserverError::Internal("execution insert failed".into())))
    }

    /// A one-off registration is consumed by its firing; CAS the task to
    /// DISABLED so a restart never refires it.
    async fn disable_oneoff(&self, task: &tasks::Model) -> Result<()> {
        let result = tasks::Entity::update_many()
            .col_expr(
                tasks::Column::Status,
                sea_orm::sea_query::Expr::value(TaskStatus::Disabled.to_string()),
            )
            .col_expr(
                tasks::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(tasks::Column::Id.eq(task.id))
            .filter(tasks::Column::Status.eq(TaskStatus::Active.to_string()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::info!(task_id = %task.id, "One-off task fired, disabled");
        }
        Ok(())
    }

    async fn time_until_next_due(&self) -> Option<std::time::Duration> {
        let inner = self.inner.lock().await;
        inner.heap.peek().map(|Reverse(entry)| {
            (entry.due_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
        })
    }

    /// The scheduler loop: sleep until the heap root is due (or a mutation
    /// wakes us), fire due entries, and periodically reconcile with the task
    /// table.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.restore_from_database().await {
            tracing::error!("Failed to restore schedule registrations: {}", e);
        }

        let mut sync_interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.sync_interval_secs));
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wait = self
                .time_until_next_due()
                .await
                .unwrap_or(std::time::Duration::from_secs(IDLE_WAIT_SECS));

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Schedule engine shutting down");
                    break;
                }
                _ = self.notify.notified() => {
                    // Registration changed; recompute the wait.
                }
                _ = sync_interval.tick() => {
                    if let Err(e) = self.sync_registrations().await {
                        tracing::error!("Registration sync failed: {}", e);
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        tracing::error!("Scheduler tick failed: {}", e);
                    }
                }
            }
        }
    }
}
