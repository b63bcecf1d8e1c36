//! Repository management and record read-back
//!
//! POST /repositories, GET /repositories/:repo_id,
//! GET /repositories/:repo_id/:segment/:id, GET /agents/:kind/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::records::fetch_record;
use crate::db::repositories::{create_repository, get_repository, Repository};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /repositories request
#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub repo_code: String,
    pub name: String,
}

/// POST /repositories response
#[derive(Debug, Serialize)]
pub struct CreateRepositoryResponse {
    pub id: i64,
    pub uri: String,
}

/// GET /repositories/:repo_id response
#[derive(Debug, Serialize)]
pub struct RepositoryResponse {
    pub uri: String,
    #[serde(flatten)]
    pub repository: Repository,
}

/// POST /repositories
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRepositoryRequest>,
) -> ApiResult<(StatusCode, Json<CreateRepositoryResponse>)> {
    let repo_code = request.repo_code.trim();
    if repo_code.is_empty() {
        return Err(ApiError::BadRequest("repo_code must not be empty".to_string()));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let id = create_repository(&state.db, repo_code, request.name.trim())
        .await
        .map_err(|e| match e {
            arcs_common::Error::InvalidInput(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        })?;

    tracing::info!(repo_id = id, repo_code, "Repository created");

    Ok((
        StatusCode::CREATED,
        Json(CreateRepositoryResponse {
            id,
            uri: format!("/repositories/{}", id),
        }),
    ))
}

/// GET /repositories/:repo_id
pub async fn show(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
) -> ApiResult<Json<RepositoryResponse>> {
    let repository = get_repository(&state.db, repo_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Repository {}", repo_id)))?;

    Ok(Json(RepositoryResponse {
        uri: repository.uri(),
        repository,
    }))
}

/// GET /repositories/:repo_id/:segment/:id
pub async fn show_repository_record(
    State(state): State<AppState>,
    Path((repo_id, segment, id)): Path<(i64, String, i64)>,
) -> ApiResult<Json<Value>> {
    show_record(&state, format!("/repositories/{}/{}/{}", repo_id, segment, id)).await
}

/// GET /agents/:kind/:id
pub async fn show_agent(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    show_record(&state, format!("/agents/{}/{}", kind, id)).await
}

async fn show_record(state: &AppState, uri: String) -> ApiResult<Json<Value>> {
    fetch_record(&state.db, &state.registry, &uri)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(uri))
}

pub fn repository_routes() -> Router<AppState> {
    Router::new()
        .route("/repositories", post(create))
        .route("/repositories/:repo_id", get(show))
        .route("/repositories/:repo_id/:segment/:id", get(show_repository_record))
        .route("/agents/:kind/:id", get(show_agent))
}
