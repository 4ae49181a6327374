use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    load_project, load_task_in_project, map_domain_error, ApiError, Paginated, PaginationQuery,
};
use crate::database::execution_logs::{self, LogLevel};
use crate::database::executions::{self, ExecutionStatus, TriggerType};
use crate::error::ObserverError;
use crate::stats::aggregator::{DEFAULT_STATS_DAYS, MAX_STATS_DAYS};
use crate::utils::validation;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/projects/:project_id/tasks/:task_id/executions",
            get(list_task_executions),
        )
        .route(
            "/projects/:project_id/executions/failed-stats",
            get(failed_stats),
        )
        .route("/projects/:project_id/executions/stats", get(stats))
        .route(
            "/projects/:project_id/executions/:execution_id",
            get(get_execution),
        )
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub date: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub uuid: Uuid,
    pub task_uuid: Uuid,
    pub project_uuid: Uuid,
    pub status: String,
    pub trigger_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub response_status: Option<i32>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogResponse>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionResponse {
    pub fn from_model(model: executions::Model) -> Self {
        Self {
            uuid: model.id,
            task_uuid: model.task_id,
            project_uuid: model.project_id,
            status: ExecutionStatus::from(model.status).as_api(),
            trigger_type: TriggerType::from(model.trigger_type).as_api(),
            scheduled_at: model.scheduled_at,
            started_at: model.started_at,
            ended_at: model.ended_at,
            duration_ms: model.duration_ms,
            response_status: model.response_status,
            error: model.error_message,
            logs: None,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub fn with_logs(mut self, logs: Vec<execution_logs::Model>) -> Self {
        self.logs = Some(
            logs.into_iter()
                .map(|log| LogResponse {
                    timestamp: log.timestamp,
                    level: LogLevel::parse_api(&log.level)
                        .unwrap_or(LogLevel::Info)
                        .as_api(),
                    message: log.message,
                    metadata: log.metadata,
                })
                .collect(),
        );
        self
    }
}

pub async fn list_task_executions(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Paginated<ExecutionResponse>>, ApiError> {
    load_task_in_project(&state.db, project_id, task_id)
        .await
        .map_err(map_domain_error)?;

    let pagination = PaginationQuery {
        page: query.page,
        page_size: query.page_size,
    };
    let (page, page_size) = pagination.resolve().map_err(map_domain_error)?;

    let date = query
        .date
        .as_deref()
        .map(validation::parse_date_param)
        .transpose()
        .map_err(map_domain_error)?;

    let (items, total) = state
        .lifecycle
        .list_task_executions(task_id, date, page, page_size)
        .await
        .map_err(map_domain_error)?;

    let data = items
        .into_iter()
        .map(ExecutionResponse::from_model)
        .collect();
    Ok(Json(Paginated::new(data, page, page_size, total)))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path((project_id, execution_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;

    let execution = state
        .lifecycle
        .get_execution(execution_id)
        .await
        .map_err(map_domain_error)?
        .filter(|execution| execution.project_id == project_id)
        .ok_or_else(|| {
            map_domain_error(ObserverError::ExecutionNotFound(execution_id.to_string()))
        })?;

    let logs = state
        .lifecycle
        .get_logs(execution_id)
        .await
        .map_err(map_domain_error)?;

    Ok(Json(ExecutionResponse::from_model(execution).with_logs(logs)))
}

fn resolve_days(query: &StatsQuery) -> Result<u64, ObserverError> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    if days < 1 || days > MAX_STATS_DAYS {
        return Err(ObserverError::Validation(format!(
            "days must be between 1 and {MAX_STATS_DAYS}"
        )));
    }
    Ok(days)
}

/// Daily failure counts, newest date first.
pub async fn failed_stats(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;
    let days = resolve_days(&query).map_err(map_domain_error)?;

    let rows = state
        .stats
        .daily_stats(project_id, days)
        .await
        .map_err(map_domain_error)?;

    let stats: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "date": row.date,
                "count": row.failures,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "data": { "stats": stats } })))
}

/// Daily success/failure/total counters, newest date first.
pub async fn stats(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;
    let days = resolve_days(&query).map_err(map_domain_error)?;

    let rows = state
        .stats
        .daily_stats(project_id, days)
        .await
        .map_err(map_domain_error)?;

    let stats: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "date": row.date,
                "success": row.success,
                "failures": row.failures,
                "total": row.total,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "data": { "stats": stats } })))
}
