//! Read-back of imported records

use arcs_common::registry::{ParsedReference, RecordTypeRegistry};
use arcs_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

/// Load a persisted record as JSON, with `uri` and `lock_version` filled in
pub async fn fetch_record(
    pool: &SqlitePool,
    registry: &RecordTypeRegistry,
    uri: &str,
) -> Result<Option<Value>> {
    let Some(ParsedReference {
        record_type,
        id,
        repo_id,
    }) = registry.parse_reference(uri)
    else {
        return Ok(None);
    };
    let record_type = registry
        .get(record_type)
        .ok_or_else(|| Error::Internal(format!("Unregistered record type {}", record_type)))?;

    let row = match repo_id {
        Some(repo_id) => {
            let sql = format!(
                "SELECT json, lock_version FROM {} WHERE id = ? AND repo_id = ?",
                record_type.table
            );
            sqlx::query(&sql).bind(id).bind(repo_id).fetch_optional(pool).await?
        }
        None => {
            let sql = format!("SELECT json, lock_version FROM {} WHERE id = ?", record_type.table);
            sqlx::query(&sql).bind(id).fetch_optional(pool).await?
        }
    };

    let Some(row) = row else {
        return Ok(None);
    };

    let json: String = row.get("json");
    let lock_version: i64 = row.get("lock_version");
    let mut body: Map<String, Value> = serde_json::from_str(&json)
        .map_err(|e| Error::Internal(format!("Stored record {} is not valid JSON: {}", uri, e)))?;
    body.insert("uri".to_string(), Value::String(uri.to_string()));
    body.insert("lock_version".to_string(), Value::from(lock_version));

    Ok(Some(Value::Object(body)))
}
