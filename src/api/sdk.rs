use axum::{
    extract::{Extension, Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::executions::ExecutionResponse;
use crate::api::{map_domain_error, ApiError};
use crate::auth::SdkProject;
use crate::database::execution_logs::LogLevel;
use crate::database::executions::{self, ExecutionStatus};
use crate::database::tasks;
use crate::error::ObserverError;
use crate::execution::{LogEntryInput, StatusUpdate};
use crate::AppState;

const DEFAULT_CLAIM_LIMIT: u64 = 10;
const MAX_CLAIM_LIMIT: u64 = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tasks/:task_id/executions/pending", get(pending_executions))
        .route("/executions/:execution_id/status", put(update_execution_status))
        .route("/executions/:execution_id/logs", post(append_execution_logs))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    pub error: Option<String>,
    pub response_status: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LogPayload {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct LogsRequest {
    pub logs: Vec<LogPayload>,
}

/// Claim-candidate list: PENDING executions ordered by scheduled_at. Reading
/// does not transition anything; the executor reports RUNNING explicitly.
pub async fn pending_executions(
    State(state): State<AppState>,
    Extension(sdk): Extension<SdkProject>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task = tasks::Entity::find_by_id(task_id)
        .one(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?
        .ok_or_else(|| map_domain_error(ObserverError::TaskNotFound(task_id.to_string())))?;
    ensure_project(&sdk, task.project_id).map_err(map_domain_error)?;

    let limit = query.limit.unwrap_or(DEFAULT_CLAIM_LIMIT).clamp(1, MAX_CLAIM_LIMIT);
    let pending = state
        .lifecycle
        .claim_pending(task_id, limit)
        .await
        .map_err(map_domain_error)?;

    let data: Vec<ExecutionResponse> = pending
        .into_iter()
        .map(ExecutionResponse::from_model)
        .collect();
    Ok(Json(serde_json::json!({ "data": data })))
}

pub async fn update_execution_status(
    State(state): State<AppState>,
    Extension(sdk): Extension<SdkProject>,
    Path(execution_id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let execution = load_owned_execution(&state, &sdk, execution_id)
        .await
        .map_err(map_domain_error)?;

    let new_status = ExecutionStatus::parse_api(&request.status).ok_or_else(|| {
        map_domain_error(ObserverError::Validation(format!(
            "Unknown execution status: {}",
            request.status
        )))
    })?;

    let updated = state
        .lifecycle
        .update_status(
            execution.id,
            new_status,
            StatusUpdate {
                error: request.error,
                response_status: request.response_status,
            },
        )
        .await
        .map_err(map_domain_error)?;

    Ok(Json(ExecutionResponse::from_model(updated)))
}

pub async fn append_execution_logs(
    State(state): State<AppState>,
    Extension(sdk): Extension<SdkProject>,
    Path(execution_id): Path<Uuid>,
    Json(request): Json<LogsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let execution = load_owned_execution(&state, &sdk, execution_id)
        .await
        .map_err(map_domain_error)?;

    let entries = request
        .logs
        .into_iter()
        .map(|log| {
            let level = LogLevel::parse_api(&log.level).ok_or_else(|| {
                ObserverError::Validation(format!("Unknown log level: {}", log.level))
            })?;
            Ok(LogEntryInput {
                timestamp: log.timestamp,
                level,
                message: log.message,
                metadata: log.metadata,
            })
        })
        .collect::<Result<Vec<_>, ObserverError>>()
        .map_err(map_domain_error)?;

    let appended = state
        .lifecycle
        .append_logs(execution.id, entries)
        .await
        .map_err(map_domain_error)?;

    Ok(Json(serde_json::json!({ "appended": appended })))
}

fn ensure_project(sdk: &SdkProject, project_id: Uuid) -> Result<(), ObserverError> {
    if sdk.project_id != project_id {
        return Err(ObserverError::Forbidden(
            "API key does not grant access to this resource".to_string(),
        ));
    }
    Ok(())
}

async fn load_owned_execution(
    state: &AppState,
    sdk: &SdkProject,
    execution_id: Uuid,
) -> Result<executions::Model, ObserverError> {
    let execution = state
        .lifecycle
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| ObserverError::ExecutionNotFound(execution_id.to_string()))?;
    ensure_project(sdk, execution.project_id)?;
    Ok(execution)
}
