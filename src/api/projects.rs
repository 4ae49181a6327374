use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    load_project, map_domain_error, ApiError, Paginated, PaginationQuery,
};
use crate::database::projects::{
    self, generate_api_key, AlertEmails, ProjectRole, ProjectUser, ProjectUsers,
};
use crate::error::ObserverError;
use crate::utils::validation;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:project_id", put(update_project))
        .route("/projects/:project_id/rotate-key", post(rotate_api_key))
}

#[derive(Debug, Deserialize)]
pub struct ProjectUserPayload {
    pub email: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub execution_endpoint: Option<String>,
    pub alert_emails: Option<Vec<String>>,
    pub project_users: Option<Vec<ProjectUserPayload>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub execution_endpoint: Option<String>,
    pub alert_emails: Option<Vec<String>>,
    pub project_users: Option<Vec<ProjectUserPayload>>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub uuid: Uuid,
    pub name: String,
    pub api_key: String,
    pub execution_endpoint: Option<String>,
    pub alert_emails: Vec<String>,
    pub project_users: Vec<ProjectUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<projects::Model> for ProjectResponse {
    fn from(model: projects::Model) -> Self {
        Self {
            uuid: model.id,
            name: model.name,
            api_key: model.api_key,
            execution_endpoint: model.execution_endpoint,
            alert_emails: model.alert_emails.0,
            project_users: model.project_users.0,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

fn parse_project_users(payload: Vec<ProjectUserPayload>) -> Result<Vec<ProjectUser>, ObserverError> {
    payload
        .into_iter()
        .map(|user| {
            validation::validate_email(&user.email)?;
            let role = match user.role.to_lowercase().as_str() {
                "admin" => ProjectRole::Admin,
                "readonly" => ProjectRole::Readonly,
                other => {
                    return Err(ObserverError::Validation(format!(
                        "Unknown project role: {other}"
                    )))
                }
            };
            Ok(ProjectUser {
                email: user.email,
                role,
            })
        })
        .collect()
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<ProjectResponse>>, ApiError> {
    let (page, page_size) = pagination.resolve().map_err(map_domain_error)?;

    let paginator = projects::Entity::find()
        .order_by_asc(projects::Column::CreatedAt)
        .paginate(&*state.db, page_size);
    let total = paginator
        .num_items()
        .await
        .map_err(|e| map_domain_error(e.into()))?;
    let items = paginator
        .fetch_page(page - 1)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    let data = items.into_iter().map(ProjectResponse::from).collect();
    Ok(Json(Paginated::new(data, page, page_size, total)))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    validation::validate_name(&request.name).map_err(map_domain_error)?;
    let alert_emails = request.alert_emails.unwrap_or_default();
    validation::validate_emails(&alert_emails).map_err(map_domain_error)?;
    let project_users = parse_project_users(request.project_users.unwrap_or_default())
        .map_err(map_domain_error)?;

    let now = Utc::now();
    let project = projects::ActiveModel {
        id: Set(Uuid::now_v7()),
        name: Set(request.name.trim().to_string()),
        api_key: Set(generate_api_key()),
        execution_endpoint: Set(request.execution_endpoint),
        alert_emails: Set(AlertEmails(alert_emails)),
        project_users: Set(ProjectUsers(project_users)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = project
        .insert(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(project_id = %created.id, "Created project");
    Ok((StatusCode::CREATED, Json(ProjectResponse::from(created))))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;

    let mut active: projects::ActiveModel = project.into();

    if let Some(name) = request.name {
        validation::validate_name(&name).map_err(map_domain_error)?;
        active.name = Set(name.trim().to_string());
    }
    if let Some(endpoint) = request.execution_endpoint {
        active.execution_endpoint = Set(Some(endpoint));
    }
    if let Some(emails) = request.alert_emails {
        validation::validate_emails(&emails).map_err(map_domain_error)?;
        active.alert_emails = Set(AlertEmails(emails));
    }
    if let Some(users) = request.project_users {
        let users = parse_project_users(users).map_err(map_domain_error)?;
        active.project_users = Set(ProjectUsers(users));
    }
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(project_id = %project_id, "Updated project");
    Ok(Json(ProjectResponse::from(updated)))
}

/// Issue a fresh API key, revoking the old one.
pub async fn rotate_api_key(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = load_project(&state.db, project_id)
        .await
        .map_err(map_domain_error)?;

    let mut active: projects::ActiveModel = project.into();
    active.api_key = Set(generate_api_key());
    active.updated_at = Set(Utc::now());

    let updated = active
        .update(&*state.db)
        .await
        .map_err(|e| map_domain_error(e.into()))?;

    tracing::info!(project_id = %project_id, "Rotated project API key");
    Ok(Json(ProjectResponse::from(updated)))
}
