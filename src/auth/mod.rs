use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use crate::database::projects;
use crate::AppState;

/// Identity attached to SDK requests after the API key resolved to a project.
/// Handlers use it to scope lookups to that project.
#[derive(Clone, Debug)]
pub struct SdkProject {
    pub project_id: uuid::Uuid,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();

    // Health check stays open for probes.
    if path == "/health" {
        return Ok(next.run(request).await);
    }

    // SDK surface: project API key.
    if path.starts_with("/api/v1/sdk/") {
        let api_key = request
            .headers()
            .get("x-api-key")
            .and_then(|h| h.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?
            .to_string();

        let project = projects::Entity::find()
            .filter(projects::Column::ApiKey.eq(api_key))
            .one(&*state.db)
            .await
            .map_err(|e| {
                tracing::error!("API key lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        request.extensions_mut().insert(SdkProject {
            project_id: project.id,
        });
        return Ok(next.run(request).await);
    }

    // UI surface: bearer session token. Session issuance lives outside this
    // service; the token is validated against configuration.
    if path.starts_with("/api/v1/") {
        let token = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if token == state.config.api_token {
            return Ok(next.run(request).await);
        }
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
