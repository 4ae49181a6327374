use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{load_project, map_domain_error, ApiError, Paginated, PaginationQuery};
use crate::database::task_groups::{self, GroupStatus, ManualOverride};
use crate::error::ObserverError;
use crate::schedule::{evaluator, window};
use crate::utils::validation;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/projects/:project_id/task-groups",
            get(list_task_groups).post(create_task_group),
        )
        .route(
            "/projects/:project_id/task-groups/:group_id",
            put(update_task_group).delete(delete_task_group),
        )
        .route(
            "/projects/:project_id/task-groups/:group_id/start",
            post(start_task_group),
        )
        .route(
            "/projects/:project_id/task-groups/:group_id/stop",
            post(stop_task_group),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskGroupRequest {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskGroupResponse {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub state: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_response(model: task_groups::Model) -> Result<TaskGroupResponse, ObserverError> {
    let running = window::group_is_running(&model, Utc::now())?;
    Ok(TaskGroupResponse {
        uuid: model.id,
        project_uuid: model.project_id,
        name: model.name,
        description: model.description,
        status: GroupStatus::from(model.status).to_string().to_uppercase(),
        state: if running { "RUNNING" } else { "NOT_RUNNING" }.to_string(),
        start_time: model.start_time,
        end_time: model.end_time,
        timezone: model.timezone,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// The daily window is only meaningful with both bounds present.
fn validate_window(start: &Option<String>, end: &Option<String>) -> Result<(), ObserverError> {
    match (start, end) {
        (Some(start), Some(end)) => {
            window::parse_hhmm(start)?;
            window::parse_hhmm(end)?;
            Ok(())
        }
        (None, None) => Ok(()),
        _ => Err(ObserverError::Validation(
            "start_time and end_time must be provided together".to_string(),
        )),
    }
}

pub async fn list_task_groups(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<TaskGroupResponse>>, ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;
    let (page, page_size) = pagination.resolve().map_err(map_domain_error)?;

    let paginator = task_groups::Entity::find()
        .filter(task_groups::Column::ProjectId.eq(project_id))
        .order_by_asc(task_groups::Column::CreatedAt)
        .paginate(&*state.db, page_size);
    let total = paginator
        .num_items()
        .await
        .map_err(|e| map_domain_error(e.into()))?;
    let items = paginator
        .fetch_page(page - 1)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    let data = items
        .into_iter()
        .map(to_response)
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_domain_error)?;
    Ok(Json(Paginated::new(data, page, page_size, total)))
}

pub async fn create_task_group(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<CreateTaskGroupRequest>,
) -> Result<(StatusCode, Json<TaskGroupResponse>), ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;

    validation::validate_name(&request.name).map_err(map_domain_error)?;
    evaluator::parse_timezone(&request.timezone).map_err(map_domain_error)?;
    validate_window(&request.start_time, &request.end_time).map_err(map_domain_error)?;

    let status = match request.status.as_deref() {
        Some(raw) => GroupStatus::parse_api(raw).ok_or_else(|| {
            map_domain_error(ObserverError::Validation(format!(
                "Unknown task group status: {raw}"
            )))
        })?,
        None => GroupStatus::Active,
    };

    let now = Utc::now();
    let group = task_groups::ActiveModel {
        id: Set(Uuid::now_v7()),
        project_id: Set(project_id),
        name: Set(request.name.trim().to_string()),
        description: Set(request.description),
        status: Set(status.to_string()),
        start_time: Set(request.start_time),
        end_time: Set(request.end_time),
        timezone: Set(request.timezone),
        manual_override: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = group
        .insert(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(group_id = %created.id, project_id = %project_id, "Created task group");
    let response = to_response(created).map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update_task_group(
    State(state): State<AppState>,
    Path((project_id, group_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateTaskGroupRequest>,
) -> Result<Json<TaskGroupResponse>, ApiError> {
    let group = load_group(&state, project_id, group_id)
        .await
        .map_err(map_domain_error)?;

    let start_time = request.start_time.clone().or(group.start_time.clone());
    let end_time = request.end_time.clone().or(group.end_time.clone());
    validate_window(&start_time, &end_time).map_err(map_domain_error)?;

    let mut active: task_groups::ActiveModel = group.into();

    if let Some(name) = request.name {
        validation::validate_name(&name).map_err(map_domain_error)?;
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = request.description {
        active.description = Set(Some(description));
    }
    if let Some(raw) = request.status {
        let status = GroupStatus::parse_api(&raw).ok_or_else(|| {
            map_domain_error(ObserverError::Validation(format!(
                "Unknown task group status: {raw}"
            )))
        })?;
        active.status = Set(status.to_string());
    }
    if let Some(timezone) = request.timezone {
        evaluator::parse_timezone(&timezone).map_err(map_domain_error)?;
        active.timezone = Set(timezone);
    }
    if request.start_time.is_some() {
        active.start_time = Set(request.start_time);
    }
    if request.end_time.is_some() {
        active.end_time = Set(request.end_time);
    }

    // Any edit clears a manual override; the window is authoritative again.
    active.manual_override = Set(None);
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(group_id = %group_id, "Updated task group");
    Ok(Json(to_response(updated).map_err(map_domain_error)?))
}

pub async fn delete_task_group(
    State(state): State<AppState>,
    Path((project_id, group_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_group(&state, project_id, group_id)
        .await
        .map_err(map_domain_error)?;

    // Tasks keep running ungrouped; the FK nulls their group reference.
    task_groups::Entity::delete_by_id(group_id)
        .exec(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(group_id = %group_id, "Deleted task group");
    Ok(Json(serde_json::json!({
        "status": "deleted",
        "group_uuid": group_id,
    })))
}

pub async fn start_task_group(
    State(state): State<AppState>,
    Path((project_id, group_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TaskGroupResponse>, ApiError> {
    set_override(&state, project_id, group_id, ManualOverride::Started).await
}

pub async fn stop_task_group(
    State(state): State<AppState>,
    Path((project_id, group_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TaskGroupResponse>, ApiError> {
    set_override(&state, project_id, group_id, ManualOverride::Stopped).await
}

async fn set_override(
    state: &AppState,
    project_id: Uuid,
    group_id: Uuid,
    value: ManualOverride,
) -> Result<Json<TaskGroupResponse>, ApiError> {
    let group = load_group(state, project_id, group_id)
        .await
        .map_err(map_domain_error)?;

    let mut active: task_groups::ActiveModel = group.into();
    active.manual_override = Set(Some(value.to_string()));
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(group_id = %group_id, override_state = %value, "Set task group override");
    Ok(Json(to_response(updated).map_err(map_domain_error)?))
}

async fn load_group(
    state: &AppState,
    project_id: Uuid,
    group_id: Uuid,
) -> Result<task_groups::Model, ObserverError> {
    load_project(&state.db, project_id).await?;
    let group = task_groups::Entity::find_by_id(group_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ObserverError::TaskGroupNotFound(group_id.to_string()))?;
    if group.project_id != project_id {
        return Err(ObserverError::TaskGroupNotFound(group_id.to_string()));
    }
    Ok(group)
}
