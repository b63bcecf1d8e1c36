//! arcs-backend library interface
//!
//! Exposes the import pipeline, application state and router for the binary
//! and for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod import;

pub use crate::error::{ApiError, ApiResult};

use arcs_common::config::ImportConfig;
use arcs_common::RecordTypeRegistry;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::import::{ImportStore, SqliteImportStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Known record types
    pub registry: Arc<RecordTypeRegistry>,
    /// Storage used by batch imports
    pub store: Arc<dyn ImportStore>,
    /// Retry, progress and spool settings for batch imports
    pub import_config: ImportConfig,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, registry: Arc<RecordTypeRegistry>, import_config: ImportConfig) -> Self {
        let store = Arc::new(SqliteImportStore::new(db.clone(), import_config.transactional));
        Self::with_store(db, registry, store, import_config)
    }

    /// State with a caller-supplied import store
    pub fn with_store(
        db: SqlitePool,
        registry: Arc<RecordTypeRegistry>,
        store: Arc<dyn ImportStore>,
        import_config: ImportConfig,
    ) -> Self {
        Self {
            db,
            registry,
            store,
            import_config,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_import_routes())
        .merge(api::repository_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
