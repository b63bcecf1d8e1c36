//! Storage facility used by the import pipeline
//!
//! The pipeline only needs to check that referenced records exist, insert new
//! records, and commit or roll back. [`ImportStore`] hands out one
//! [`StoreSession`] per attempt; when the backend supports multi-version
//! concurrency the session is a real transaction, otherwise every statement
//! commits on its own.

use arcs_common::registry::RecordType;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use super::error::ImportError;

/// A record ready to be written
#[derive(Debug, Clone, Copy)]
pub struct NewRecord<'a> {
    pub record_type: &'a RecordType,
    /// Caller's logical identifier, used in error messages only
    pub logical_uri: &'a str,
    pub repo_id: Option<i64>,
    pub title: &'a str,
    pub identifier: Option<&'a str>,
    pub json: &'a str,
}

/// Source of storage sessions
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Whether a failed attempt can be rolled back completely
    fn supports_mvcc(&self) -> bool;

    async fn begin(&self) -> Result<Box<dyn StoreSession>, ImportError>;
}

/// One attempt's view of storage
#[async_trait]
pub trait StoreSession: Send {
    /// Does a record of this type exist (in this repository, for
    /// repository-scoped types)?
    async fn record_exists(
        &mut self,
        record_type: &RecordType,
        id: i64,
        repo_id: Option<i64>,
    ) -> Result<bool, ImportError>;

    /// Insert a record, returning its id
    async fn insert_record(&mut self, record: NewRecord<'_>) -> Result<i64, ImportError>;

    async fn commit(self: Box<Self>) -> Result<(), ImportError>;

    async fn rollback(self: Box<Self>) -> Result<(), ImportError>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteImportStore {
    pool: SqlitePool,
    transactional: bool,
}

impl SqliteImportStore {
    pub fn new(pool: SqlitePool, transactional: bool) -> Self {
        Self {
            pool,
            transactional,
        }
    }
}

#[async_trait]
impl ImportStore for SqliteImportStore {
    fn supports_mvcc(&self) -> bool {
        self.transactional
    }

    async fn begin(&self) -> Result<Box<dyn StoreSession>, ImportError> {
        let session = if self.transactional {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| classify_sqlx_error(e, "transaction"))?;
            SqliteSession::Transaction(tx)
        } else {
            let conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| classify_sqlx_error(e, "connection"))?;
            SqliteSession::Direct(conn)
        };

        Ok(Box::new(session))
    }
}

enum SqliteSession {
    Transaction(Transaction<'static, Sqlite>),
    Direct(PoolConnection<Sqlite>),
}

impl SqliteSession {
    fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            SqliteSession::Transaction(tx) => &mut **tx,
            SqliteSession::Direct(conn) => &mut **conn,
        }
    }
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn record_exists(
        &mut self,
        record_type: &RecordType,
        id: i64,
        repo_id: Option<i64>,
    ) -> Result<bool, ImportError> {
        let count: i64 = match repo_id {
            Some(repo_id) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE id = ? AND repo_id = ?",
                    record_type.table
                );
                sqlx::query_scalar(&sql)
                    .bind(id)
                    .bind(repo_id)
                    .fetch_one(self.conn())
                    .await
            }
            None => {
                let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", record_type.table);
                sqlx::query_scalar(&sql).bind(id).fetch_one(self.conn()).await
            }
        }
        .map_err(|e| classify_sqlx_error(e, "reference lookup"))?;

        Ok(count > 0)
    }

    async fn insert_record(&mut self, record: NewRecord<'_>) -> Result<i64, ImportError> {
        let sql = format!(
            "INSERT INTO {} (repo_id, title, identifier, json) VALUES (?, ?, ?, ?)",
            record.record_type.table
        );

        let result = sqlx::query(&sql)
            .bind(record.repo_id)
            .bind(record.title)
            .bind(record.identifier)
            .bind(record.json)
            .execute(self.conn())
            .await
            .map_err(|e| classify_sqlx_error(e, record.logical_uri))?;

        Ok(result.last_insert_rowid())
    }

    async fn commit(self: Box<Self>) -> Result<(), ImportError> {
        match *self {
            SqliteSession::Transaction(tx) => tx
                .commit()
                .await
                .map_err(|e| classify_sqlx_error(e, "commit")),
            SqliteSession::Direct(_) => Ok(()),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), ImportError> {
        match *self {
            SqliteSession::Transaction(tx) => tx
                .rollback()
                .await
                .map_err(|e| classify_sqlx_error(e, "rollback")),
            SqliteSession::Direct(_) => {
                debug!("Non-transactional session: nothing to roll back");
                Ok(())
            }
        }
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Map a sqlx error onto the import taxonomy.
///
/// Busy/locked (primary codes 5 and 6, including their extended forms) are
/// concurrency conflicts; constraint violations (primary code 19) are
/// persistence validation failures; anything else is a storage error.
pub fn classify_sqlx_error(err: sqlx::Error, subject: &str) -> ImportError {
    if let sqlx::Error::Database(db_err) = &err {
        let primary = db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);

        match primary {
            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => {
                return ImportError::Conflict(db_err.message().to_string());
            }
            Some(SQLITE_CONSTRAINT) => {
                return ImportError::Persistence {
                    uri: subject.to_string(),
                    message: db_err.message().to_string(),
                };
            }
            _ => {}
        }

        if db_err.is_unique_violation()
            || db_err.is_foreign_key_violation()
            || db_err.is_check_violation()
        {
            return ImportError::Persistence {
                uri: subject.to_string(),
                message: db_err.message().to_string(),
            };
        }
    }

    let message = err.to_string();
    if message.contains("database is locked") || matches!(err, sqlx::Error::PoolTimedOut) {
        return ImportError::Conflict(message);
    }

    ImportError::Storage(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcs_common::db::init_memory_database;
    use arcs_common::RecordTypeRegistry;

    async fn setup() -> (SqlitePool, RecordTypeRegistry) {
        let registry = RecordTypeRegistry::standard();
        let pool = init_memory_database(&registry).await.unwrap();
        sqlx::query("INSERT INTO repositories (repo_code, name) VALUES ('r1', 'One')")
            .execute(&pool)
            .await
            .unwrap();
        (pool, registry)
    }

    fn classification<'a>(registry: &'a RecordTypeRegistry, identifier: &'a str) -> NewRecord<'a> {
        NewRecord {
            record_type: registry.get("classification").unwrap(),
            logical_uri: "c",
            repo_id: Some(1),
            title: "Correspondence",
            identifier: Some(identifier),
            json: "{}",
        }
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_discards_inserts() {
        let (pool, registry) = setup().await;
        let store = SqliteImportStore::new(pool.clone(), true);

        let mut session = store.begin().await.unwrap();
        let id = session.insert_record(classification(&registry, "C1")).await.unwrap();
        assert!(session
            .record_exists(registry.get("classification").unwrap(), id, Some(1))
            .await
            .unwrap());
        session.rollback().await.unwrap();

        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_direct_session_keeps_writes() {
        let (pool, registry) = setup().await;
        let store = SqliteImportStore::new(pool.clone(), false);
        assert!(!store.supports_mvcc());

        let mut session = store.begin().await.unwrap();
        session.insert_record(classification(&registry, "C1")).await.unwrap();
        session.rollback().await.unwrap();

        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_record_exists_respects_repository() {
        let (pool, registry) = setup().await;
        let store = SqliteImportStore::new(pool.clone(), true);
        let classification_type = registry.get("classification").unwrap();

        let mut session = store.begin().await.unwrap();
        let id = session.insert_record(classification(&registry, "C1")).await.unwrap();

        assert!(session.record_exists(classification_type, id, Some(1)).await.unwrap());
        assert!(!session.record_exists(classification_type, id, Some(2)).await.unwrap());
        assert!(!session.record_exists(classification_type, id + 1, Some(1)).await.unwrap());
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_violation_is_persistence_error() {
        let (pool, registry) = setup().await;
        let store = SqliteImportStore::new(pool, true);

        let mut session = store.begin().await.unwrap();
        session.insert_record(classification(&registry, "C1")).await.unwrap();
        let err = session
            .insert_record(classification(&registry, "C1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Persistence { .. }), "got {:?}", err);
        assert!(!err.is_retryable());
        session.rollback().await.unwrap();
    }

    #[test]
    fn test_non_database_errors_are_storage_errors() {
        let err = classify_sqlx_error(sqlx::Error::RowNotFound, "x");
        assert!(matches!(err, ImportError::Storage(_)));

        let err = classify_sqlx_error(sqlx::Error::PoolTimedOut, "x");
        assert!(matches!(err, ImportError::Conflict(_)));
    }
}
