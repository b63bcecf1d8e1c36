//! Batch processor
//!
//! Drives decode → resolve → persist for every record of one attempt. The
//! first error ends the attempt; whether that error is retried is up to the
//! caller.

use arcs_common::registry::{RecordType, RecordTypeRegistry, Scope};
use arcs_common::schema::{ref_value, FieldKind};
use serde_json::{Map, Value};
use tokio::io::AsyncBufRead;
use tracing::{debug, trace};

use super::decoder::{ImportRecord, RecordReader};
use super::error::ImportError;
use super::outcome::{CreatedRecords, PersistedRecord};
use super::progress::ImportMonitor;
use super::store::{NewRecord, StoreSession};

/// An attempt that stopped early, with the records it had written so far
#[derive(Debug)]
pub struct ProcessFailure {
    pub error: ImportError,
    pub partial: CreatedRecords,
}

/// Persists one stream of records into one repository
pub struct BatchProcessor<'a> {
    registry: &'a RecordTypeRegistry,
    repo_id: i64,
    monitor: &'a ImportMonitor,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(registry: &'a RecordTypeRegistry, repo_id: i64, monitor: &'a ImportMonitor) -> Self {
        Self {
            registry,
            repo_id,
            monitor,
        }
    }

    pub fn repo_id(&self) -> i64 {
        self.repo_id
    }

    /// Consume the stream to the end or to the first error
    pub async fn process<R>(
        &self,
        reader: R,
        session: &mut dyn StoreSession,
    ) -> Result<CreatedRecords, ProcessFailure>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut records = RecordReader::new(reader, self.registry);
        let mut created = CreatedRecords::new();

        loop {
            let record = match records.next_record().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(error) => {
                    return Err(ProcessFailure {
                        error,
                        partial: created,
                    })
                }
            };

            if let Err(error) = self.persist(record, session, &mut created).await {
                return Err(ProcessFailure {
                    error,
                    partial: created,
                });
            }
        }

        debug!(repo_id = self.repo_id, records = created.len(), "Batch processed");
        Ok(created)
    }

    async fn persist(
        &self,
        record: ImportRecord<'_>,
        session: &mut dyn StoreSession,
        created: &mut CreatedRecords,
    ) -> Result<(), ImportError> {
        let ImportRecord {
            logical_uri,
            record_type,
            mut body,
            ..
        } = record;

        for field in record_type.schema.reference_fields() {
            let allowed = match field.kind {
                FieldKind::Ref(allowed) | FieldKind::RefList(allowed) => allowed,
                _ => continue,
            };

            match body.get_mut(field.name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) if matches!(field.kind, FieldKind::RefList(_)) => {
                    for item in items.iter_mut() {
                        self.resolve_in_place(item, field.name, allowed, &logical_uri, session, created)
                            .await?;
                    }
                }
                Some(value) => {
                    self.resolve_in_place(value, field.name, allowed, &logical_uri, session, created)
                        .await?;
                }
            }
        }

        let title = record_title(record_type, &body);
        let identifier = record_type
            .identifier_field
            .and_then(|field| body.get(field))
            .and_then(Value::as_str)
            .map(str::to_string);

        body.remove("uri");
        body.remove("id");
        body.insert(
            "jsonmodel_type".to_string(),
            Value::String(record_type.name.to_string()),
        );
        let json = serde_json::to_string(&body).map_err(|e| ImportError::Persistence {
            uri: logical_uri.clone(),
            message: e.to_string(),
        })?;

        let repo_id = match record_type.scope {
            Scope::Repository => Some(self.repo_id),
            Scope::Global => None,
        };

        let id = session
            .insert_record(NewRecord {
                record_type,
                logical_uri: &logical_uri,
                repo_id,
                title: &title,
                identifier: identifier.as_deref(),
                json: &json,
            })
            .await?;

        let uri = RecordTypeRegistry::uri_for(record_type, self.repo_id, id);
        trace!(logical_uri = %logical_uri, uri = %uri, "Record created");

        created.insert(logical_uri, PersistedRecord { uri, id });
        self.monitor.record_processed();
        Ok(())
    }

    /// Replace a reference (bare string or `{"ref": ...}`) with the URI of
    /// the persisted record it names
    async fn resolve_in_place(
        &self,
        value: &mut Value,
        field: &str,
        allowed: &[&str],
        logical_uri: &str,
        session: &mut dyn StoreSession,
        created: &CreatedRecords,
    ) -> Result<(), ImportError> {
        let reference = ref_value(value)
            .map(str::to_string)
            .ok_or_else(|| ImportError::Validation {
                uri: logical_uri.to_string(),
                errors: vec![format!("{}: Property was expected to be a reference", field)],
            })?;

        let resolved = self
            .resolve(&reference, field, allowed, logical_uri, session, created)
            .await?;

        match value {
            Value::Object(obj) => {
                obj.insert("ref".to_string(), Value::String(resolved));
            }
            other => *other = Value::String(resolved),
        }
        Ok(())
    }

    async fn resolve(
        &self,
        reference: &str,
        field: &str,
        allowed: &[&str],
        logical_uri: &str,
        session: &mut dyn StoreSession,
        created: &CreatedRecords,
    ) -> Result<String, ImportError> {
        let unresolved = || ImportError::UnresolvedReference {
            uri: logical_uri.to_string(),
            field: field.to_string(),
            reference: reference.to_string(),
        };

        // Created earlier in this attempt
        if let Some(record) = created.get(reference) {
            let parsed = self.registry.parse_reference(&record.uri).ok_or_else(unresolved)?;
            check_allowed(parsed.record_type, field, allowed, logical_uri)?;
            return Ok(record.uri.clone());
        }

        // Already in storage
        let parsed = self.registry.parse_reference(reference).ok_or_else(unresolved)?;
        check_allowed(parsed.record_type, field, allowed, logical_uri)?;

        if let Some(repo_id) = parsed.repo_id {
            if repo_id != self.repo_id {
                return Err(unresolved());
            }
        }

        let record_type = self.registry.get(parsed.record_type).ok_or_else(unresolved)?;
        if session
            .record_exists(record_type, parsed.id, parsed.repo_id)
            .await?
        {
            Ok(reference.to_string())
        } else {
            Err(unresolved())
        }
    }
}

fn check_allowed(
    record_type: &str,
    field: &str,
    allowed: &[&str],
    logical_uri: &str,
) -> Result<(), ImportError> {
    if allowed.contains(&record_type) {
        Ok(())
    } else {
        Err(ImportError::Validation {
            uri: logical_uri.to_string(),
            errors: vec![format!(
                "{}: Reference to a {} is not allowed (expected one of: {})",
                field,
                record_type,
                allowed.join(", ")
            )],
        })
    }
}

/// Display title: agents take the first name's `sort_name`
fn record_title(record_type: &RecordType, body: &Map<String, Value>) -> String {
    let title = if record_type.is_agent() {
        body.get("names")
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(|name| name.get("sort_name"))
            .and_then(Value::as_str)
    } else {
        body.get("title").and_then(Value::as_str)
    };

    title.unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::store::{ImportStore, SqliteImportStore};
    use arcs_common::db::init_memory_database;
    use sqlx::SqlitePool;

    async fn setup() -> (SqlitePool, RecordTypeRegistry) {
        let registry = RecordTypeRegistry::standard();
        let pool = init_memory_database(&registry).await.unwrap();
        sqlx::query("INSERT INTO repositories (repo_code, name) VALUES ('r1', 'One'), ('r2', 'Two')")
            .execute(&pool)
            .await
            .unwrap();
        (pool, registry)
    }

    async fn run(
        pool: &SqlitePool,
        registry: &RecordTypeRegistry,
        input: &str,
    ) -> Result<CreatedRecords, ProcessFailure> {
        let monitor = ImportMonitor::new();
        let processor = BatchProcessor::new(registry, 1, &monitor);
        let store = SqliteImportStore::new(pool.clone(), true);
        let mut session = store.begin().await.unwrap();

        let result = processor.process(input.as_bytes(), session.as_mut()).await;
        match result {
            Ok(_) => session.commit().await.unwrap(),
            Err(_) => session.rollback().await.unwrap(),
        }
        result
    }

    async fn stored_json(pool: &SqlitePool, table: &str, id: i64) -> Value {
        let sql = format!("SELECT json FROM {} WHERE id = ?", table);
        let json: String = sqlx::query_scalar(&sql).bind(id).fetch_one(pool).await.unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_creates_records_in_order() {
        let (pool, registry) = setup().await;

        let created = run(
            &pool,
            &registry,
            r#"[{"id":"a","title":"X"},{"id":"b","title":"Y"}]"#,
        )
        .await
        .unwrap();

        let entries: Vec<_> = created.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[0].1.uri, format!("/repositories/1/archival_objects/{}", entries[0].1.id));
        assert_eq!(entries[1].0, "b");
        assert_ne!(entries[0].1.id, entries[1].1.id);

        let stored = stored_json(&pool, "archival_objects", entries[0].1.id).await;
        assert_eq!(stored["title"], "X");
        assert_eq!(stored["jsonmodel_type"], "archival_object");
        assert!(stored.get("id").is_none());
    }

    #[tokio::test]
    async fn test_references_to_earlier_records_are_rewritten() {
        let (pool, registry) = setup().await;

        let input = r#"[
            {"uri":"/agents/people/import_1","jsonmodel_type":"agent_person","names":[{"sort_name":"Smith, Jan"}]},
            {"uri":"cl","jsonmodel_type":"classification","identifier":"C1","title":"Letters","creator":{"ref":"/agents/people/import_1"}},
            {"uri":"parent","title":"Series 1","classifications":[{"ref":"cl"}]},
            {"uri":"child","title":"File 1","parent":"parent","linked_agents":[{"ref":"/agents/people/import_1","role":"creator"}]}
        ]"#;
        let created = run(&pool, &registry, input).await.unwrap();
        assert_eq!(created.len(), 4);

        let agent = created.get("/agents/people/import_1").unwrap();
        assert_eq!(agent.uri, format!("/agents/people/{}", agent.id));

        let classification = created.get("cl").unwrap();
        let stored = stored_json(&pool, "classifications", classification.id).await;
        assert_eq!(stored["creator"]["ref"], agent.uri.as_str());

        let parent = created.get("parent").unwrap();
        let child = created.get("child").unwrap();
        let stored = stored_json(&pool, "archival_objects", child.id).await;
        assert_eq!(stored["parent"], parent.uri.as_str());
        assert_eq!(stored["linked_agents"][0]["ref"], agent.uri.as_str());
        assert_eq!(stored["linked_agents"][0]["role"], "creator");

        let title: String = sqlx::query_scalar("SELECT title FROM agent_person WHERE id = ?")
            .bind(agent.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(title, "Smith, Jan");
    }

    #[tokio::test]
    async fn test_references_to_existing_records() {
        let (pool, registry) = setup().await;
        let first = run(&pool, &registry, r#"[{"id":"p","title":"Existing"}]"#)
            .await
            .unwrap();
        let existing = first.get("p").unwrap().uri.clone();

        let input = format!(r#"[{{"id":"c","title":"Child","parent":"{}"}}]"#, existing);
        let created = run(&pool, &registry, &input).await.unwrap();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_reference_stops_batch() {
        let (pool, registry) = setup().await;

        let failure = run(
            &pool,
            &registry,
            r#"[{"id":"a","title":"X"},{"id":"b","title":"Y","parent":"nowhere"},{"id":"c","title":"Z"}]"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            failure.error,
            ImportError::UnresolvedReference { ref field, ref reference, .. }
                if field == "parent" && reference == "nowhere"
        ));
        assert_eq!(failure.partial.len(), 1);
        assert!(failure.partial.contains("a"));
    }

    #[tokio::test]
    async fn test_reference_into_other_repository_is_unresolved() {
        let (pool, registry) = setup().await;
        sqlx::query("INSERT INTO archival_objects (repo_id, title, json) VALUES (2, 'Elsewhere', '{}')")
            .execute(&pool)
            .await
            .unwrap();

        let failure = run(
            &pool,
            &registry,
            r#"[{"id":"a","title":"X","parent":"/repositories/2/archival_objects/1"}]"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, ImportError::UnresolvedReference { .. }));
    }

    #[tokio::test]
    async fn test_reference_to_wrong_type_is_validation_error() {
        let (pool, registry) = setup().await;

        let failure = run(
            &pool,
            &registry,
            r#"[{"id":"a","title":"X"},{"id":"b","jsonmodel_type":"classification_term","identifier":"T1","title":"T","classification":"a"}]"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, ImportError::Validation { ref uri, .. } if uri == "b"));
    }

    #[tokio::test]
    async fn test_duplicate_identifier_is_persistence_error() {
        let (pool, registry) = setup().await;

        let failure = run(
            &pool,
            &registry,
            r#"[
                {"uri":"c1","jsonmodel_type":"classification","identifier":"C1","title":"One"},
                {"uri":"c2","jsonmodel_type":"classification","identifier":"C1","title":"Two"}
            ]"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, ImportError::Persistence { ref uri, .. } if uri == "c2"));
        assert!(!failure.error.is_retryable());
    }

    #[test]
    fn test_agent_title_from_sort_name() {
        let registry = RecordTypeRegistry::standard();
        let body = serde_json::json!({"names": [{"sort_name": "Family, The"}]});
        let title = record_title(
            registry.get("agent_family").unwrap(),
            body.as_object().unwrap(),
        );
        assert_eq!(title, "Family, The");
    }
}
