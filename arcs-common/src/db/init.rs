//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! Every statement is idempotent, so this runs on each startup.

use crate::registry::RecordTypeRegistry;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Busy timeout applied to file-backed databases
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database file and initialize the schema
pub async fn init_database(db_path: &Path, registry: &RecordTypeRegistry) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets readers proceed while an import transaction holds the writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    let pragma_sql = format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    create_schema(&pool, registry).await?;

    Ok(pool)
}

/// In-memory database with the full schema (tests and throwaway instances)
///
/// A single connection is kept alive for the life of the pool; every new
/// connection to `sqlite::memory:` would otherwise see an empty database.
pub async fn init_memory_database(registry: &RecordTypeRegistry) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool, registry).await?;

    Ok(pool)
}

/// Create the repositories table and one table per registered record type
pub async fn create_schema(pool: &SqlitePool, registry: &RecordTypeRegistry) -> Result<()> {
    create_repositories_table(pool).await?;

    for record_type in registry.types() {
        create_record_table(pool, record_type.table).await?;

        if record_type.identifier_field.is_some() {
            let index_sql = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_identifier \
                 ON {table} (repo_id, identifier)",
                table = record_type.table
            );
            sqlx::query(&index_sql).execute(pool).await?;
        }
    }

    debug!("Schema initialized for {} record types", registry.types().count());
    Ok(())
}

async fn create_repositories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Uniform layout shared by every record table.
///
/// `repo_id` is NULL for globally scoped types; the full record is kept as
/// JSON in `json` with references already rewritten to persisted URIs.
async fn create_record_table(pool: &SqlitePool, table: &str) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER REFERENCES repositories(id),
            title TEXT NOT NULL,
            identifier TEXT,
            json TEXT NOT NULL,
            lock_version INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        table = table
    );

    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}
