use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

use cron_observer::database::executions::{self, ExecutionStatus, TriggerType};
use cron_observer::database::projects::{self, AlertEmails, ProjectUsers};
use cron_observer::database::tasks::{self, HttpTrigger, ScheduleConfig, TriggerConfig};
use cron_observer::error::ObserverError;
use cron_observer::establish_connection;
use cron_observer::events::{EventBus, ObserverEvent};
use cron_observer::execution::{LifecycleService, LogEntryInput, StatusUpdate};
use cron_observer::database::execution_logs::LogLevel;

async fn setup() -> (Arc<DatabaseConnection>, Arc<LifecycleService>, EventBus) {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let bus = EventBus::new(16);
    let lifecycle = Arc::new(LifecycleService::new(db.clone(), bus.clone()));
    (db, lifecycle, bus)
}

async fn create_task(db: &DatabaseConnection, timeout_seconds: Option<i64>) -> tasks::Model {
    let now = Utc::now();
    let project = projects::ActiveModel {
        id: Set(Uuid::now_v7()),
        name: Set("Lifecycle Project".to_string()),
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

    tasks::ActiveModel {
        id: Set(Uuid::now_v7()),
        project_id: Set(project.id),
        task_group_id: Set(None),
        name: Set("lifecycle task".to_string()),
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
        status: Set("active".to_string()),
        timeout_seconds: Set(timeout_seconds),
        metadata: Set(serde_json::json!({})),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

fn log_entry(message: &str) -> LogEntryInput {
    LogEntryInput {
        timestamp: None,
        level: LogLevel::Info,
        message: message.to_string(),
        metadata: None,
    }
}

#[tokio::test]
async fn happy_path_stamps_timestamps_and_duration() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Scheduled, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        ExecutionStatus::from(execution.status.clone()),
        ExecutionStatus::Pending
    );
    assert!(execution.started_at.is_none());

    let running = lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();
    assert!(running.started_at.is_some());
    assert!(running.ended_at.is_none());

    let done = lifecycle
        .update_status(execution.id, ExecutionStatus::Success, StatusUpdate::default())
        .await
        .unwrap();
    assert!(done.ended_at.is_some());
    assert!(done.ended_at.unwrap() >= done.started_at.unwrap());
    let expected = (done.ended_at.unwrap() - done.started_at.unwrap()).num_milliseconds();
    assert_eq!(done.duration_ms, Some(expected));
}

#[tokio::test]
async fn terminal_status_rejects_further_transitions() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Manual, Utc::now())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Success, StatusUpdate::default())
        .await
        .unwrap();

    let err = lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ObserverError::InvalidStateTransition { .. }));

    let reloaded = executions::Entity::find_by_id(execution.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ExecutionStatus::from(reloaded.status),
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn pending_can_cancel_but_not_complete() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Manual, Utc::now())
        .await
        .unwrap();

    let err = lifecycle
        .update_status(execution.id, ExecutionStatus::Success, StatusUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ObserverError::InvalidStateTransition { .. }));

    let cancelled = lifecycle
        .update_status(execution.id, ExecutionStatus::Cancelled, StatusUpdate::default())
        .await
        .unwrap();
    assert!(cancelled.ended_at.is_some());
    // Never started, so no duration.
    assert_eq!(cancelled.duration_ms, None);
}

#[tokio::test]
async fn failed_records_error_and_response_status() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Manual, Utc::now())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();

    let failed = lifecycle
        .update_status(
            execution.id,
            ExecutionStatus::Failed,
            StatusUpdate {
                error: Some("endpoint exploded".to_string()),
                response_status: Some(502),
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("endpoint exploded"));
    assert_eq!(failed.response_status, Some(502));
}

#[tokio::test]
async fn terminal_transition_publishes_event() {
    let (db, lifecycle, bus) = setup().await;
    let task = create_task(&db, None).await;
    let mut rx = bus.subscribe();

    let execution = lifecycle
        .create_execution(&task, TriggerType::Scheduled, Utc::now())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Failed, StatusUpdate::default())
        .await
        .unwrap();

    let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match envelope.event {
        ObserverEvent::ExecutionFinished {
            execution_id,
            status,
            ..
        } => {
            assert_eq!(execution_id, execution.id);
            assert_eq!(status, ExecutionStatus::Failed);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn claim_pending_orders_by_scheduled_at() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let base = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    // Insert out of order.
    for offset in [30i64, 10, 20] {
        lifecycle
            .create_execution(&task, TriggerType::Scheduled, base + ChronoDuration::minutes(offset))
            .await
            .unwrap();
    }

    let claimed = lifecycle.claim_pending(task.id, 2).await.unwrap();
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].scheduled_at, base + ChronoDuration::minutes(10));
    assert_eq!(claimed[1].scheduled_at, base + ChronoDuration::minutes(20));

    // Claiming mutates nothing.
    let again = lifecycle.claim_pending(task.id, 10).await.unwrap();
    assert_eq!(again.len(), 3);
}

#[tokio::test]
async fn logs_append_and_freeze_on_terminal() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Manual, Utc::now())
        .await
        .unwrap();

    let appended = lifecycle
        .append_logs(execution.id, vec![log_entry("starting"), log_entry("working")])
        .await
        .unwrap();
    assert_eq!(appended, 2);

    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Failed, StatusUpdate::default())
        .await
        .unwrap();

    let err = lifecycle
        .append_logs(execution.id, vec![log_entry("too late")])
        .await
        .unwrap_err();
    assert!(matches!(err, ObserverError::Conflict(_)));

    // The list never shrank and the rejected entry never landed.
    let logs = lifecycle.get_logs(execution.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "starting");
}

#[tokio::test]
async fn log_batch_cap_enforced() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, None).await;
    let execution = lifecycle
        .create_execution(&task, TriggerType::Manual, Utc::now())
        .await
        .unwrap();

    let batch: Vec<_> = (0..1001).map(|i| log_entry(&format!("line {i}"))).collect();
    let err = lifecycle.append_logs(execution.id, batch).await.unwrap_err();
    assert!(matches!(err, ObserverError::Validation(_)));
    assert!(lifecycle.get_logs(execution.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn watchdog_fails_timed_out_executions() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, Some(60)).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Scheduled, Utc::now())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();

    // Backdate the start beyond the 60s budget.
    let mut active: executions::ActiveModel = executions::Entity::find_by_id(execution.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.started_at = Set(Some(Utc::now() - ChronoDuration::seconds(120)));
    active.update(&*db).await.unwrap();

    let failed = lifecycle.fail_timed_out(Utc::now()).await.unwrap();
    assert_eq!(failed, 1);

    let reloaded = executions::Entity::find_by_id(execution.id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ExecutionStatus::from(reloaded.status),
        ExecutionStatus::Failed
    );
    assert_eq!(reloaded.error_message.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn watchdog_ignores_executions_within_budget() {
    let (db, lifecycle, _bus) = setup().await;
    let task = create_task(&db, Some(3600)).await;

    let execution = lifecycle
        .create_execution(&task, TriggerType::Scheduled, Utc::now())
        .await
        .unwrap();
    lifecycle
        .update_status(execution.id, ExecutionStatus::Running, StatusUpdate::default())
        .await
        .unwrap();

    assert_eq!(lifecycle.fail_timed_out(Utc::now()).await.unwrap(), 0);
}
