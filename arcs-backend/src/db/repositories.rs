//! Repository rows

use arcs_common::{Error, Result};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Repository {
    pub id: i64,
    pub repo_code: String,
    pub name: String,
    pub created_at: chrono::NaiveDateTime,
}

impl Repository {
    pub fn uri(&self) -> String {
        format!("/repositories/{}", self.id)
    }
}

/// Insert a repository, returning its id.
///
/// A duplicate `repo_code` is reported as [`Error::InvalidInput`].
pub async fn create_repository(pool: &SqlitePool, repo_code: &str, name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO repositories (repo_code, name) VALUES (?, ?)")
        .bind(repo_code)
        .bind(name)
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            Error::InvalidInput(format!("Repository code '{}' is already in use", repo_code)),
        ),
        Err(e) => Err(Error::Database(e)),
    }
}

pub async fn get_repository(pool: &SqlitePool, id: i64) -> Result<Option<Repository>> {
    let repository = sqlx::query_as::<_, Repository>(
        "SELECT id, repo_code, name, created_at FROM repositories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(repository)
}

pub async fn repository_exists(pool: &SqlitePool, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcs_common::db::init_memory_database;
    use arcs_common::RecordTypeRegistry;

    #[tokio::test]
    async fn test_create_and_get_repository() {
        let pool = init_memory_database(&RecordTypeRegistry::standard()).await.unwrap();

        let id = create_repository(&pool, "MSS", "Manuscripts").await.unwrap();
        assert!(repository_exists(&pool, id).await.unwrap());
        assert!(!repository_exists(&pool, id + 1).await.unwrap());

        let repository = get_repository(&pool, id).await.unwrap().unwrap();
        assert_eq!(repository.repo_code, "MSS");
        assert_eq!(repository.uri(), format!("/repositories/{}", id));
    }

    #[tokio::test]
    async fn test_duplicate_repo_code_is_invalid_input() {
        let pool = init_memory_database(&RecordTypeRegistry::standard()).await.unwrap();

        create_repository(&pool, "MSS", "Manuscripts").await.unwrap();
        let err = create_repository(&pool, "MSS", "Again").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
