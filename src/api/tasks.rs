use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    load_project, load_task_in_project, map_domain_error, ApiError, Paginated, PaginationQuery,
};
use crate::database::task_groups;
use crate::database::tasks::{self, ScheduleConfig, ScheduleType, TaskStatus, TriggerConfig};
use crate::error::ObserverError;
use crate::events::ObserverEvent;
use crate::schedule::{evaluator, window};
use crate::utils::validation;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:project_id/tasks", get(list_tasks).post(create_task))
        .route(
            "/projects/:project_id/tasks/:task_id",
            put(update_task).delete(delete_task),
        )
        .route(
            "/projects/:project_id/tasks/:task_id/status",
            patch(set_task_status),
        )
        .route(
            "/projects/:project_id/tasks/:task_id/trigger",
            post(trigger_task),
        )
        .route("/validate-cron", post(validate_cron))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub description: Option<String>,
    pub task_group_uuid: Option<Uuid>,
    pub schedule_type: Option<String>,
    pub schedule_config: ScheduleConfig,
    pub trigger_config: TriggerConfig,
    pub status: Option<String>,
    pub timeout_seconds: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub task_group_uuid: Option<Uuid>,
    pub schedule_type: Option<String>,
    pub schedule_config: Option<ScheduleConfig>,
    pub trigger_config: Option<TriggerConfig>,
    pub timeout_seconds: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCronRequest {
    pub cron_expression: String,
    pub timezone: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateCronResponse {
    pub valid: bool,
    pub next_executions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub task_group_uuid: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub schedule_type: String,
    pub schedule_config: ScheduleConfig,
    pub trigger_config: TriggerConfig,
    pub status: String,
    pub state: String,
    pub timeout_seconds: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// System-computed task state: RUNNING iff the task is ACTIVE, its own gates
/// pass right now, and its group (when any) is running.
async fn compute_state(state: &AppState, task: &tasks::Model) -> Result<bool, ObserverError> {
    if TaskStatus::from(task.status.clone()) != TaskStatus::Active {
        return Ok(false);
    }
    let now = Utc::now();
    if !window::schedule_gates_pass(&task.schedule_config, now)? {
        return Ok(false);
    }
    if let Some(group_id) = task.task_group_id {
        if let Some(group) = task_groups::Entity::find_by_id(group_id)
            .one(&*state.db)
            .await?
        {
            return window::group_is_running(&group, now);
        }
    }
    Ok(true)
}

async fn to_response(state: &AppState, task: tasks::Model) -> Result<TaskResponse, ObserverError> {
    let running = compute_state(state, &task).await?;
    Ok(TaskResponse {
        uuid: task.id,
        project_uuid: task.project_id,
        task_group_uuid: task.task_group_id,
        name: task.name,
        description: task.description,
        schedule_type: ScheduleType::from(task.schedule_type).to_string().to_uppercase(),
        schedule_config: task.schedule_config,
        trigger_config: task.trigger_config,
        status: TaskStatus::from(task.status).as_api(),
        state: if running { "RUNNING" } else { "NOT_RUNNING" }.to_string(),
        timeout_seconds: task.timeout_seconds,
        metadata: task.metadata,
        created_at: task.created_at,
        updated_at: task.updated_at,
    })
}

/// A referenced group must exist inside the same project.
async fn check_group(
    state: &AppState,
    project_id: Uuid,
    group_id: Uuid,
) -> Result<(), ObserverError> {
    let group = task_groups::Entity::find_by_id(group_id)
        .one(&*state.db)
        .await?;
    match group {
        Some(group) if group.project_id == project_id => Ok(()),
        _ => Err(ObserverError::Validation(format!(
            "task_group_uuid {group_id} does not exist in this project"
        ))),
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<TaskResponse>>, ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;
    let (page, page_size) = pagination.resolve().map_err(map_domain_error)?;

    let paginator = tasks::Entity::find()
        .filter(tasks::Column::ProjectId.eq(project_id))
        .order_by_asc(tasks::Column::CreatedAt)
        .paginate(&*state.db, page_size);
    let total = paginator
        .num_items()
        .await
        .map_err(|e| map_domain_error(e.into()))?;
    let items = paginator
        .fetch_page(page - 1)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    let mut data = Vec::with_capacity(items.len());
    for task in items {
        data.push(to_response(&state, task).await.map_err(map_domain_error)?);
    }
    Ok(Json(Paginated::new(data, page, page_size, total)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;

    validation::validate_name(&request.name).map_err(map_domain_error)?;

    let status = match request.status.as_deref() {
        Some(raw) => TaskStatus::parse_user_settable(raw).ok_or_else(|| {
            map_domain_error(ObserverError::Validation(format!(
                "Task status must be ACTIVE or DISABLED, got {raw}"
            )))
        })?,
        None => TaskStatus::Active,
    };
    let schedule_type = match request.schedule_type.as_deref() {
        Some(raw) => ScheduleType::parse_api(raw).ok_or_else(|| {
            map_domain_error(ObserverError::Validation(format!(
                "Unknown schedule_type: {raw}"
            )))
        })?,
        None => ScheduleType::Recurring,
    };

    validation::validate_schedule_config(&request.schedule_config, status)
        .map_err(map_domain_error)?;
    validation::validate_trigger(&request.trigger_config).map_err(map_domain_error)?;
    validation::validate_timeout_seconds(request.timeout_seconds).map_err(map_domain_error)?;

    if let Some(group_id) = request.task_group_uuid {
        check_group(&state, project_id, group_id)
            .await
            .map_err(map_domain_error)?;
    }

    let now = Utc::now();
    let task = tasks::ActiveModel {
        id: Set(Uuid::now_v7()),
        project_id: Set(project_id),
        task_group_id: Set(request.task_group_uuid),
        name: Set(request.name.trim().to_string()),
        description: Set(request.description),
        schedule_type: Set(schedule_type.to_string()),
        schedule_config: Set(request.schedule_config),
        trigger_config: Set(request.trigger_config),
        status: Set(status.to_string()),
        timeout_seconds: Set(request.timeout_seconds),
        metadata: Set(request.metadata.unwrap_or_else(|| serde_json::json!({}))),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = task
        .insert(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    if let Err(e) = state.engine.register(&created).await {
        tracing::warn!(task_id = %created.id, "Could not register new task: {}", e);
    }
    state.bus.publish(ObserverEvent::TaskCreated {
        task_id: created.id,
        project_id,
    });

    tracing::info!(task_id = %created.id, project_id = %project_id, "Created task");
    let response = to_response(&state, created).await.map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    let status = TaskStatus::from(task.status.clone());
    if !status.accepts_user_mutations() {
        return Err(map_domain_error(ObserverError::Conflict(format!(
            "Task {task_id} is pending deletion and cannot be modified"
        ))));
    }

    let schedule_type = match request.schedule_type.as_deref() {
        Some(raw) => ScheduleType::parse_api(raw).ok_or_else(|| {
            map_domain_error(ObserverError::Validation(format!(
                "Unknown schedule_type: {raw}"
            )))
        })?,
        None => ScheduleType::from(task.schedule_type.clone()),
    };

    let schedule_config = request
        .schedule_config
        .unwrap_or_else(|| task.schedule_config.clone());
    validation::validate_schedule_config(&schedule_config, status).map_err(map_domain_error)?;

    if let Some(trigger) = &request.trigger_config {
        validation::validate_trigger(trigger).map_err(map_domain_error)?;
    }
    validation::validate_timeout_seconds(request.timeout_seconds).map_err(map_domain_error)?;

    if let Some(group_id) = request.task_group_uuid {
        check_group(&state, project_id, group_id)
            .await
            .map_err(map_domain_error)?;
    }

    let mut active: tasks::ActiveModel = task.into();
    if let Some(name) = request.name {
        validation::validate_name(&name).map_err(map_domain_error)?;
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(group_id) = request.task_group_uuid {
        active.task_group_id = Set(Some(group_id));
    }
    active.schedule_type = Set(schedule_type.to_string());
    active.schedule_config = Set(schedule_config);
    if let Some(trigger) = request.trigger_config {
        active.trigger_config = Set(trigger);
    }
    if let Some(timeout) = request.timeout_seconds {
        active.timeout_seconds = Set(Some(timeout));
    }
    if let Some(metadata) = request.metadata {
        active.metadata = Set(metadata);
    }
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    // Re-register so the heap reflects the edited schedule immediately.
    if let Err(e) = state.engine.register(&updated).await {
        tracing::warn!(task_id = %task_id, "Could not re-register task: {}", e);
    }
    state.bus.publish(ObserverEvent::TaskUpdated {
        task_id,
        project_id,
    });

    tracing::info!(task_id = %task_id, "Updated task");
    Ok(Json(to_response(&state, updated).await.map_err(map_domain_error)?))
}

pub async fn set_task_status(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<SetStatusRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    let current = TaskStatus::from(task.status.clone());
    if !current.accepts_user_mutations() {
        return Err(map_domain_error(ObserverError::Conflict(format!(
            "Task {task_id} is pending deletion and cannot be modified"
        ))));
    }

    let new_status = TaskStatus::parse_user_settable(&request.status).ok_or_else(|| {
        map_domain_error(ObserverError::Validation(format!(
            "Task status must be ACTIVE or DISABLED, got {}",
            request.status
        )))
    })?;

    if new_status == TaskStatus::Active {
        // Enabling re-validates the schedule; a task without a parseable cron
        // cannot become active.
        validation::validate_schedule_config(&task.schedule_config, new_status)
            .map_err(map_domain_error)?;
    }

    // Compare-and-set so a racing delete keeps its PENDING_DELETE marker.
    let result = tasks::Entity::update_many()
        .col_expr(tasks::Column::Status, Expr::value(new_status.to_string()))
        .col_expr(tasks::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(tasks::Column::Id.eq(task_id))
        .filter(tasks::Column::Status.eq(current.to_string()))
        .exec(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;
    if result.rows_affected == 0 {
        return Err(map_domain_error(ObserverError::Conflict(format!(
            "Task {task_id} was modified concurrently"
        ))));
    }
    let updated = load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    match new_status {
        TaskStatus::Active => {
            if let Err(e) = state.engine.register(&updated).await {
                tracing::warn!(task_id = %task_id, "Could not register task: {}", e);
            }
        }
        _ => state.engine.unregister(task_id).await,
    }
    state.bus.publish(ObserverEvent::TaskStatusChanged {
        task_id,
        project_id,
        status: new_status.to_string(),
    });

    tracing::info!(task_id = %task_id, status = %new_status, "Task status changed");
    Ok(Json(to_response(&state, updated).await.map_err(map_domain_error)?))
}

/// Two-phase delete: flip to PENDING_DELETE and enqueue for the worker in
/// one transaction, then answer 202. Repeating the call is a no-op 202.
pub async fn delete_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let task = load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    let current = TaskStatus::from(task.status.clone());
    if current == TaskStatus::PendingDelete {
        return Ok(accepted_response(task_id));
    }

    let txn = state
        .db
        .begin()
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    let marked = tasks::Entity::update_many()
        .col_expr(
            tasks::Column::Status,
            Expr::value(TaskStatus::PendingDelete.to_string()),
        )
        .col_expr(tasks::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(tasks::Column::Id.eq(task_id))
        .filter(tasks::Column::Status.eq(current.to_string()))
        .exec(&txn)
        .await
        .map_err(|e| map_domain_error(e.into()))?;
    if marked.rows_affected == 0 {
        // A concurrent delete got here first; its queue message will finish
        // the job.
        return Ok(accepted_response(task_id));
    }

    state
        .delete_queue
        .enqueue(&txn, task_id, project_id)
        .await
        .map_err(map_domain_error)?;

    txn.commit()
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    state.engine.unregister(task_id).await;
    state.bus.publish(ObserverEvent::TaskStatusChanged {
        task_id,
        project_id,
        status: TaskStatus::PendingDelete.to_string(),
    });

    tracing::info!(task_id = %task_id, "Task deletion queued");
    Ok(accepted_response(task_id))
}

fn accepted_response(task_id: Uuid) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "task_uuid": task_id,
            "message": "Task deletion has been queued"
        })),
    )
}

pub async fn trigger_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    let execution = state
        .engine
        .trigger_manual(task_id, "api")
        .await
        .map_err(map_domain_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "execution_uuid": execution.id,
            "scheduled_at": execution.scheduled_at.to_rfc3339(),
        })),
    ))
}

/// Validate an expression and preview its next firings.
pub async fn validate_cron(
    Json(request): Json<ValidateCronRequest>,
) -> Result<Json<ValidateCronResponse>, ApiError> {
    match evaluator::preview(&request.cron_expression, &request.timezone, 5) {
        Ok(executions) => Ok(Json(ValidateCronResponse {
            valid: true,
            next_executions: executions.iter().map(|dt| dt.to_rfc3339()).collect(),
        })),
        Err(e) => Ok(Json(ValidateCronResponse {
            valid: false,
            next_executions: vec![format!("Error: {}", e)],
        })),
    }
}
