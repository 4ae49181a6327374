use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cron_observer::database::execution_logs;
use cron_observer::database::executions::{self, ExecutionStatus, TriggerType};
use cron_observer::database::projects::{self, AlertEmails, ProjectUsers};
use cron_observer::database::tasks::{self, HttpTrigger, ScheduleConfig, TriggerConfig};
use cron_observer::delete::{DeleteQueue, DeleteWorker};
use cron_observer::error::ObserverError;
use cron_observer::establish_connection;
use cron_observer::events::{EventBus, ObserverEvent};
use cron_observer::execution::LifecycleService;
use cron_observer::schedule::ScheduleEngine;

struct Harness {
    db: Arc<DatabaseConnection>,
    queue: Arc<DeleteQueue>,
    worker: Arc<DeleteWorker>,
    engine: Arc<ScheduleEngine>,
    bus: EventBus,
}

async fn setup() -> Harness {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let bus = EventBus::new(16);
    let lifecycle = Arc::new(LifecycleService::new(db.clone(), bus.clone()));
    let engine = Arc::new(ScheduleEngine::new(db.clone(), lifecycle, 30));
    let queue = Arc::new(DeleteQueue::new(db.clone(), 30, 5));
    let worker = Arc::new(DeleteWorker::new(
        db.clone(),
        queue.clone(),
        engine.clone(),
        bus.clone(),
        100,
    ));
    Harness {
        db,
        queue,
        worker,
        engine,
        bus,
    }
}

async fn create_task_with_execution(db: &DatabaseConnection) -> (projects::Model, tasks::Model) {
    let now = Utc::now();
    let project = projects::ActiveModel {
        id: Set(Uuid::now_v7()),
        name: Set("Delete Project".to_string()),
        api_key: Set(projects::generate_api_key()),
        execution_endpoint: Set(None),
        alert_emails: Set(AlertEmails::default()),
        project_users: Set(ProjectUsers::default()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();

    let task = tasks::ActiveModel {
        id: Set(Uuid::now_v7()),
        project_id: Set(project.id),
        task_group_id: Set(None),
        name: Set("doomed task".to_string()),
        description: Set(None),
        schedule_type: Set("recurring".to_string()),
        schedule_config: Set(ScheduleConfig {
            timezone: "UTC".to_string(),
            cron_expression: Some("0 10 * * *".to_string()),
            time_range: None,
            days_of_week: None,
            exclusions: None,
        }),
        trigger_config: Set(TriggerConfig::Http {
            http: HttpTrigger {
                url: "https://example.com/hook".to_string(),
                method: "POST".to_string(),
                headers: None,
                body: None,
                timeout: None,
            },
        }),
        status: Set("pending_delete".to_string()),
        timeout_seconds: Set(None),
        metadata: Set(serde_json::json!({})),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();

    let execution = executions::ActiveModel {
        id: Set(Uuid::now_v7()),
        task_id: Set(task.id),
        project_id: Set(project.id),
        status: Set(ExecutionStatus::Pending.to_string()),
        trigger_type: Set(TriggerType::Scheduled.to_string()),
        scheduled_at: Set(now),
        started_at: Set(None),
        ended_at: Set(None),
        duration_ms: Set(None),
        response_status: Set(None),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();

    execution_logs::ActiveModel {
        id: Set(Uuid::now_v7()),
        execution_id: Set(execution.id),
        timestamp: Set(now),
        level: Set("info".to_string()),
        message: Set("about to vanish".to_string()),
        metadata: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();

    (project, task)
}

#[tokio::test]
async fn worker_deletes_task_and_owned_rows() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;
    let mut rx = harness.bus.subscribe();

    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();

    let message = harness.queue.poll().await.unwrap().expect("message visible");
    harness
        .worker
        .process(&message, &CancellationToken::new())
        .await
        .unwrap();
    harness.queue.ack(message.id).await.unwrap();

    assert!(tasks::Entity::find_by_id(task.id)
        .one(&*harness.db)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        executions::Entity::find()
            .filter(executions::Column::TaskId.eq(task.id))
            .count(&*harness.db)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        execution_logs::Entity::find().count(&*harness.db).await.unwrap(),
        0
    );

    // TaskDeleted went out on the bus.
    let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        envelope.event,
        ObserverEvent::TaskDeleted { task_id } if task_id == task.id
    ));

    // Queue fully drained.
    assert_eq!(harness.queue.visible_count().await.unwrap(), 0);
    assert!(harness.queue.poll().await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_messages_converge_without_error() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;

    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();
    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();

    let cancel = CancellationToken::new();

    let first = harness.queue.poll().await.unwrap().expect("first message");
    harness.worker.process(&first, &cancel).await.unwrap();
    harness.queue.ack(first.id).await.unwrap();

    // The second copy finds no task and still succeeds.
    let second = harness.queue.poll().await.unwrap().expect("second message");
    harness.worker.process(&second, &cancel).await.unwrap();
    harness.queue.ack(second.id).await.unwrap();

    assert!(tasks::Entity::find_by_id(task.id)
        .one(&*harness.db)
        .await
        .unwrap()
        .is_none());
    assert!(harness.queue.poll().await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_context_short_circuits_to_nack() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;

    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();
    let message = harness.queue.poll().await.unwrap().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = harness.worker.process(&message, &cancel).await.unwrap_err();
    assert!(matches!(err, ObserverError::Cancelled));

    // Task untouched.
    assert!(tasks::Entity::find_by_id(task.id)
        .one(&*harness.db)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn claimed_message_is_invisible_until_timeout() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;

    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();

    let first = harness.queue.poll().await.unwrap();
    assert!(first.is_some());
    // Claimed: hidden from the next consumer for the visibility window.
    assert!(harness.queue.poll().await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_nacks_park_message_in_dead_letter_queue() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;

    let message = harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();

    for _ in 0..5 {
        harness.queue.nack(message.id, "persistence down").await.unwrap();
    }

    let dead = harness.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 5);
    assert_eq!(dead[0].last_error.as_deref(), Some("persistence down"));

    // Dead letters are never redelivered.
    assert!(harness.queue.poll().await.unwrap().is_none());
}

#[tokio::test]
async fn worker_unregisters_task_from_engine() {
    let harness = setup().await;
    let (project, task) = create_task_with_execution(&harness.db).await;

    // Force a registration even though the task is pending delete; the
    // worker must clear it regardless.
    let mut active: tasks::ActiveModel = task.clone().into();
    active.status = Set("active".to_string());
    let task = active.update(&*harness.db).await.unwrap();
    harness.engine.register(&task).await.unwrap();
    assert_eq!(harness.engine.registered_count().await, 1);

    harness
        .queue
        .enqueue(&*harness.db, task.id, project.id)
        .await
        .unwrap();
    let message = harness.queue.poll().await.unwrap().unwrap();
    harness
        .worker
        .process(&message, &CancellationToken::new())
        .await
        .unwrap();
    harness.queue.ack(message.id).await.unwrap();

    assert_eq!(harness.engine.registered_count().await, 0);
    assert!(harness.engine.next_firing(task.id).await.is_none());
}
