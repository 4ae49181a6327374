use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cron_observer::config::Config;
use cron_observer::database::executions::ExecutionStatus;
use cron_observer::delete::{DeleteQueue, DeleteWorker};
use cron_observer::establish_connection;
use cron_observer::events::EventBus;
use cron_observer::execution::LifecycleService;
use cron_observer::schedule::ScheduleEngine;
use cron_observer::stats::FailureAggregator;
use cron_observer::{api, auth, AppState};

const TEST_TOKEN: &str = "test-token";

fn test_config() -> Config {
    Config {
        api_token: TEST_TOKEN.to_string(),
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        schedule_sync_interval_secs: 30,
        delete_worker_count: 1,
        delete_poll_interval_ms: 100,
        delete_visibility_timeout_secs: 30,
        delete_max_attempts: 5,
        event_bus_capacity: 16,
        watchdog_interval_secs: 30,
    }
}

async fn spawn_app() -> (TestServer, AppState) {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let bus = EventBus::new(16);
    let lifecycle = Arc::new(LifecycleService::new(db.clone(), bus.clone()));
    let engine = Arc::new(ScheduleEngine::new(db.clone(), lifecycle.clone(), 30));
    let delete_queue = Arc::new(DeleteQueue::new(db.clone(), 30, 5));
    let stats = Arc::new(FailureAggregator::new(db.clone()));

    let state = AppState {
        db,
        config: Arc::new(test_config()),
        engine,
        lifecycle,
        delete_queue,
        stats,
        bus,
    };

    let app = api::create_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    (TestServer::new(app).unwrap(), state)
}

fn bearer() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {TEST_TOKEN}")).unwrap(),
    )
}

fn api_key_header(key: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-api-key"),
        HeaderValue::from_str(key).unwrap(),
    )
}

async fn create_project(server: &TestServer, name: &str) -> Value {
    let (h, v) = bearer();
    let response = server
        .post("/api/v1/projects")
        .add_header(h, v)
        .json(&json!({ "name": name }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

async fn create_task(server: &TestServer, project_uuid: &str, name: &str) -> Value {
    let (h, v) = bearer();
    let response = server
        .post(&format!("/api/v1/projects/{project_uuid}/tasks"))
        .add_header(h, v)
        .json(&json!({
            "name": name,
            "schedule_config": {
                "timezone": "UTC",
                "cron_expression": "0 10 * * *"
            },
            "trigger_config": {
                "type": "HTTP",
                "http": { "url": "https://example.com/hook", "method": "POST" }
            }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn health_is_open() {
    let (server, _state) = spawn_app().await;
    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["service"], "cron-observer");
}

#[tokio::test]
async fn ui_routes_require_bearer_token() {
    let (server, _state) = spawn_app().await;

    let response = server.get("/api/v1/projects").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = server
        .get("/api/v1/projects")
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("Bearer wrong-token"),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn project_and_task_crud_flow() {
    let (server, _state) = spawn_app().await;
    let project = create_project(&server, "Billing").await;
    assert!(project["api_key"].as_str().unwrap().len() >= 32);

    let project_uuid = project["uuid"].as_str().unwrap();
    let task = create_task(&server, project_uuid, "nightly-report").await;
    assert_eq!(task["status"], "ACTIVE");
    assert_eq!(task["schedule_type"], "RECURRING");

    let (h, v) = bearer();
    let response = server
        .get(&format!("/api/v1/projects/{project_uuid}/tasks"))
        .add_header(h, v)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 100);
    assert_eq!(body["data"][0]["name"], "nightly-report");
}

#[tokio::test]
async fn task_creation_validates_cron_and_timezone() {
    let (server, _state) = spawn_app().await;
    let project = create_project(&server, "Validation").await;
    let project_uuid = project["uuid"].as_str().unwrap();

    let (h, v) = bearer();
    let response = server
        .post(&format!("/api/v1/projects/{project_uuid}/tasks"))
        .add_header(h.clone(), v.clone())
        .json(&json!({
            "name": "broken",
            "schedule_config": { "timezone": "UTC", "cron_expression": "not a cron" },
            "trigger_config": {
                "type": "HTTP",
                "http": { "url": "https://example.com", "method": "POST" }
            }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .post(&format!("/api/v1/projects/{project_uuid}/tasks"))
        .add_header(h, v)
        .json(&json!({
            "name": "broken-tz",
            "schedule_config": { "timezone": "Mars/Olympus", "cron_expression": "0 10 * * *" },
            "trigger_config": {
                "type": "HTTP",
                "http": { "url": "https://example.com", "method": "POST" }
            }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patch_status_unregisters_task() {
    let (server, state) = spawn_app().await;
    let project = create_project(&server, "Toggles").await;
    let project_uuid = project["uuid"].as_str().unwrap();
    let task = create_task(&server, project_uuid, "toggled").await;
    let task_uuid = task["uuid"].as_str().unwrap();

    let task_id: Uuid = task_uuid.parse().unwrap();
    assert!(state.engine.next_firing(task_id).await.is_some());

    let (h, v) = bearer();
    let response = server
        .patch(&format!(
            "/api/v1/projects/{project_uuid}/tasks/{task_uuid}/status"
        ))
        .add_header(h, v)
        .json(&json!({ "status": "DISABLED" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "DISABLED");
    assert_eq!(body["state"], "NOT_RUNNING");
    assert!(state.engine.next_firing(task_id).await.is_none());
}

#[tokio::test]
async fn delete_task_is_async_and_idempotent() {
    let (server, state) = spawn_app().await;
    let project = create_project(&server, "Deletions").await;
    let project_uuid = project["uuid"].as_str().unwrap();
    let task = create_task(&server, project_uuid, "doomed").await;
    let task_uuid = task["uuid"].as_str().unwrap();

    let (h, v) = bearer();
    let response = server
        .delete(&format!("/api/v1/projects/{project_uuid}/tasks/{task_uuid}"))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    // Further mutations are refused while the delete drains.
    let response = server
        .put(&format!("/api/v1/projects/{project_uuid}/tasks/{task_uuid}"))
        .add_header(h.clone(), v.clone())
        .json(&json!({ "name": "renamed" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    // Deleting again stays a 202 no-op.
    let response = server
        .delete(&format!("/api/v1/projects/{project_uuid}/tasks/{task_uuid}"))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    // Drain the queue the way the background worker would.
    let worker = DeleteWorker::new(
        state.db.clone(),
        state.delete_queue.clone(),
        state.engine.clone(),
        state.bus.clone(),
        100,
    );
    let cancel = CancellationToken::new();
    while let Some(message) = state.delete_queue.poll().await.unwrap() {
        worker.process(&message, &cancel).await.unwrap();
        state.delete_queue.ack(message.id).await.unwrap();
    }

    let response = server
        .get(&format!(
            "/api/v1/projects/{project_uuid}/tasks/{task_uuid}/executions"
        ))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .get(&format!("/api/v1/projects/{project_uuid}/tasks"))
        .add_header(h, v)
        .await;
    assert_eq!(response.json::<Value>()["total_count"], 0);
}

#[tokio::test]
async fn sdk_claim_report_and_log_flow() {
    let (server, _state) = spawn_app().await;
    let project = create_project(&server, "Executor").await;
    let project_uuid = project["uuid"].as_str().unwrap();
    let api_key = project["api_key"].as_str().unwrap().to_string();
    let task = create_task(&server, project_uuid, "claimable").await;
    let task_uuid = task["uuid"].as_str().unwrap();

    // Manual trigger creates a PENDING execution to claim.
    let (h, v) = bearer();
    let response = server
        .post(&format!(
            "/api/v1/projects/{project_uuid}/tasks/{task_uuid}/trigger"
        ))
        .add_header(h, v)
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    // Claim without a key fails.
    let response = server
        .get(&format!("/api/v1/sdk/tasks/{task_uuid}/executions/pending"))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (kh, kv) = api_key_header(&api_key);
    let response = server
        .get(&format!("/api/v1/sdk/tasks/{task_uuid}/executions/pending"))
        .add_header(kh.clone(), kv.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let pending = response.json::<Value>();
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);
    assert_eq!(pending["data"][0]["status"], "PENDING");
    assert_eq!(pending["data"][0]["trigger_type"], "MANUAL");
    let execution_uuid = pending["data"][0]["uuid"].as_str().unwrap().to_string();

    // PENDING -> RUNNING
    let response = server
        .put(&format!("/api/v1/sdk/executions/{execution_uuid}/status"))
        .add_header(kh.clone(), kv.clone())
        .json(&json!({ "status": "RUNNING" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.json::<Value>()["started_at"].is_string());

    // Logs accepted while running.
    let response = server
        .post(&format!("/api/v1/sdk/executions/{execution_uuid}/logs"))
        .add_header(kh.clone(), kv.clone())
        .json(&json!({
            "logs": [
                { "level": "INFO", "message": "working" },
                { "level": "ERROR", "message": "retrying", "metadata": { "attempt": 2 } }
            ]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["appended"], 2);

    // RUNNING -> SUCCESS with an opaque response code.
    let response = server
        .put(&format!("/api/v1/sdk/executions/{execution_uuid}/status"))
        .add_header(kh.clone(), kv.clone())
        .json(&json!({ "status": "SUCCESS", "response_status": 200 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["response_status"], 200);
    assert!(body["duration_ms"].is_i64() || body["duration_ms"].is_u64());

    // Terminal execution: no more transitions, no more logs.
    let response = server
        .put(&format!("/api/v1/sdk/executions/{execution_uuid}/status"))
        .add_header(kh.clone(), kv.clone())
        .json(&json!({ "status": "RUNNING" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    let response = server
        .post(&format!("/api/v1/sdk/executions/{execution_uuid}/logs"))
        .add_header(kh, kv)
        .json(&json!({ "logs": [{ "level": "INFO", "message": "too late" }] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sdk_key_is_scoped_to_its_project() {
    let (server, _state) = spawn_app().await;
    let project_a = create_project(&server, "Owner").await;
    let project_b = create_project(&server, "Intruder").await;
    let task = create_task(&server, project_a["uuid"].as_str().unwrap(), "private").await;
    let task_uuid = task["uuid"].as_str().unwrap();

    let (kh, kv) = api_key_header(project_b["api_key"].as_str().unwrap());
    let response = server
        .get(&format!("/api/v1/sdk/tasks/{task_uuid}/executions/pending"))
        .add_header(kh, kv)
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn failed_stats_shape_matches_contract() {
    let (server, state) = spawn_app().await;
    let project = create_project(&server, "Stats").await;
    let project_uuid = project["uuid"].as_str().unwrap();
    let project_id: Uuid = project_uuid.parse().unwrap();

    let scheduled = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    state
        .stats
        .record(project_id, scheduled, ExecutionStatus::Failed)
        .await
        .unwrap();
    state
        .stats
        .record(project_id, scheduled, ExecutionStatus::Failed)
        .await
        .unwrap();

    let (h, v) = bearer();
    let response = server
        .get(&format!(
            "/api/v1/projects/{project_uuid}/executions/failed-stats?days=7"
        ))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["data"]["stats"][0]["date"], "2025-06-01");
    assert_eq!(body["data"]["stats"][0]["count"], 2);

    let response = server
        .get(&format!(
            "/api/v1/projects/{project_uuid}/executions/stats?days=7"
        ))
        .add_header(h.clone(), v.clone())
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["data"]["stats"][0]["total"], 2);

    // Out-of-range day windows are rejected.
    let response = server
        .get(&format!(
            "/api/v1/projects/{project_uuid}/executions/failed-stats?days=91"
        ))
        .add_header(h, v)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validate_cron_endpoint_previews_firings() {
    let (server, _state) = spawn_app().await;
    let (h, v) = bearer();

    let response = server
        .post("/api/v1/validate-cron")
        .add_header(h.clone(), v.clone())
        .json(&json!({ "cron_expression": "0 10 * * *", "timezone": "UTC" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["valid"], true);
    assert_eq!(body["next_executions"].as_array().unwrap().len(), 5);

    let response = server
        .post("/api/v1/validate-cron")
        .add_header(h, v)
        .json(&json!({ "cron_expression": "bogus", "timezone": "UTC" }))
        .await;
    assert_eq!(response.json::<Value>()["valid"], false);
}

#[tokio::test]
async fn pagination_bounds_are_enforced() {
    let (server, _state) = spawn_app().await;
    let project = create_project(&server, "Pages").await;
    let project_uuid = project["uuid"].as_str().unwrap();

    let (h, v) = bearer();
    let response = server
        .get(&format!("/api/v1/projects/{project_uuid}/tasks?page_size=0"))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .get(&format!("/api/v1/projects/{project_uuid}/tasks?page_size=101"))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .get(&format!("/api/v1/projects/{project_uuid}/tasks?page=0"))
        .add_header(h, v)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn task_group_window_and_overrides() {
    let (server, _state) = spawn_app().await;
    let project = create_project(&server, "Windows").await;
    let project_uuid = project["uuid"].as_str().unwrap();

    let (h, v) = bearer();
    let response = server
        .post(&format!("/api/v1/projects/{project_uuid}/task-groups"))
        .add_header(h.clone(), v.clone())
        .json(&json!({
            "name": "always-on",
            "timezone": "UTC"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let group = response.json::<Value>();
    // No window configured: an active group is always running.
    assert_eq!(group["state"], "RUNNING");
    let group_uuid = group["uuid"].as_str().unwrap();

    // Manual stop wins over the window.
    let response = server
        .post(&format!(
            "/api/v1/projects/{project_uuid}/task-groups/{group_uuid}/stop"
        ))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.json::<Value>()["state"], "NOT_RUNNING");

    let response = server
        .post(&format!(
            "/api/v1/projects/{project_uuid}/task-groups/{group_uuid}/start"
        ))
        .add_header(h.clone(), v.clone())
        .await;
    assert_eq!(response.json::<Value>()["state"], "RUNNING");

    // Half-open windows are rejected.
    let response = server
        .post(&format!("/api/v1/projects/{project_uuid}/task-groups"))
        .add_header(h, v)
        .json(&json!({
            "name": "half-window",
            "timezone": "UTC",
            "start_time": "09:00"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
