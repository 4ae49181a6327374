pub mod executions;
pub mod health;
pub mod projects;
pub mod sdk;
pub mod task_groups;
pub mod tasks;

use axum::{http::StatusCode, Json, Router};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{projects as project_entity, tasks as task_entity};
use crate::error::{is_unique_violation, ObserverError};
use crate::AppState;

pub fn create_router() -> Router<AppState> {
    let ui_routes = Router::new()
        .merge(projects::routes())
        .merge(task_groups::routes())
        .merge(tasks::routes())
        .merge(executions::routes());

    Router::new()
        // Health check route (no auth required)
        .merge(health::routes())
        // SDK routes authenticate with X-API-Key
        .nest("/api/v1/sdk", sdk::routes())
        // UI-facing routes authenticate with a bearer token
        .nest("/api/v1", ui_routes)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Single place mapping the domain error taxonomy onto HTTP codes.
pub fn map_domain_error(e: ObserverError) -> ApiError {
    let status = match &e {
        ObserverError::Validation(_) | ObserverError::Serialization(_) => StatusCode::BAD_REQUEST,
        ObserverError::ProjectNotFound(_)
        | ObserverError::TaskGroupNotFound(_)
        | ObserverError::TaskNotFound(_)
        | ObserverError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
        ObserverError::InvalidStateTransition { .. }
        | ObserverError::Conflict(_)
        | ObserverError::TaskNotActive(_) => StatusCode::CONFLICT,
        ObserverError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ObserverError::Forbidden(_) => StatusCode::FORBIDDEN,
        ObserverError::Database(db_err) if is_unique_violation(db_err) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Internal error surfaced to API: {}", e);
    }

    (status, Json(ErrorResponse { error: e.to_string() }))
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl PaginationQuery {
    /// page >= 1, page_size in [1, 100], defaulting to page 1 / size 100.
    pub fn resolve(&self) -> Result<(u64, u64), ObserverError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ObserverError::Validation("page must be >= 1".to_string()));
        }
        let page_size = self.page_size.unwrap_or(100);
        if !(1..=100).contains(&page_size) {
            return Err(ObserverError::Validation(
                "page_size must be between 1 and 100".to_string(),
            ));
        }
        Ok((page, page_size))
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(data: Vec<T>, page: u64, page_size: u64, total_count: u64) -> Self {
        Self {
            data,
            page,
            page_size,
            total_count,
            total_pages: total_count.div_ceil(page_size),
        }
    }
}

pub(crate) async fn load_project(
    db: &DatabaseConnection,
    project_id: Uuid,
) -> Result<project_entity::Model, ObserverError> {
    project_entity::Entity::find_by_id(project_id)
        .one(db)
        .await?
        .ok_or_else(|| ObserverError::ProjectNotFound(project_id.to_string()))
}

/// Tasks are only addressable through their owning project.
pub(crate) async fn load_task_in_project(
    db: &DatabaseConnection,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<task_entity::Model, ObserverError> {
    let task = task_entity::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or_else(|| ObserverError::TaskNotFound(task_id.to_string()))?;
    if task.project_id != project_id {
        return Err(ObserverError::TaskNotFound(task_id.to_string()));
    }
    Ok(task)
}
