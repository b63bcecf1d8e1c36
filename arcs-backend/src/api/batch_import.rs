//! Batch import endpoint
//!
//! POST /repositories/:repo_id/batch_imports
//!
//! The request body is a JSON array (or newline-delimited stream) of records.
//! Once the repository is known to exist the response is always 200 with a
//! streamed `text/plain` body: progress frames while the import runs, then
//! exactly one outcome frame. Import failures are reported in that frame.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::repositories::repository_exists;
use crate::error::{ApiError, ApiResult};
use crate::import::{ImportJob, RetryPolicy};
use crate::AppState;

/// POST /repositories/:repo_id/batch_imports
pub async fn batch_import(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    if !repository_exists(&state.db, repo_id).await? {
        return Err(ApiError::NotFound(format!("Repository {}", repo_id)));
    }

    let config = &state.import_config;
    let mut job = ImportJob::new(
        repo_id,
        Arc::clone(&state.registry),
        Arc::clone(&state.store),
        RetryPolicy::from_config(config),
    );
    job.spool_dir = config.spool_dir.clone();
    job.progress_interval = Duration::from_millis(config.progress_interval_ms.max(1));
    job.last_error = Some(Arc::clone(&state.last_error));

    info!(import_id = %job.import_id, repo_id, "Accepted batch import");

    let frames = job.start(body.into_data_stream());

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(frames),
    ))
}

pub fn batch_import_routes() -> Router<AppState> {
    Router::new().route("/repositories/:repo_id/batch_imports", post(batch_import))
}
