//! Record type registry
//!
//! Built once at process start and handed to every component that needs to
//! look up a record type by name, by table or by URI. The registry is plain
//! data: nothing registers itself at load time.

use crate::schema::{FieldKind, FieldSpec, RecordSchema};

/// Agent record types, in registration order
pub const AGENT_TYPES: &[&str] = &[
    "agent_person",
    "agent_family",
    "agent_corporate_entity",
    "agent_software",
];

/// Whether records of a type live inside a repository or globally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Repository,
    Global,
}

/// One registered record type
#[derive(Debug, Clone)]
pub struct RecordType {
    /// JSON model name (`jsonmodel_type`)
    pub name: &'static str,
    /// Backing table
    pub table: &'static str,
    /// Path segment(s) used in record URIs
    pub uri_segment: &'static str,
    pub scope: Scope,
    pub schema: RecordSchema,
    /// Property copied into the `identifier` column, if any
    pub identifier_field: Option<&'static str>,
}

impl RecordType {
    pub fn is_agent(&self) -> bool {
        AGENT_TYPES.contains(&self.name)
    }
}

/// A URI that names a persisted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub record_type: &'static str,
    pub id: i64,
    /// Repository the record belongs to (`None` for global types)
    pub repo_id: Option<i64>,
}

/// Registry of known record types
#[derive(Debug, Clone)]
pub struct RecordTypeRegistry {
    types: Vec<RecordType>,
    default_type: &'static str,
}

impl RecordTypeRegistry {
    /// Empty registry; `default_type` must be registered before use
    pub fn new(default_type: &'static str) -> Self {
        Self {
            types: Vec::new(),
            default_type,
        }
    }

    /// Register a record type, replacing any earlier type with the same name
    pub fn register(&mut self, record_type: RecordType) {
        self.types.retain(|t| t.name != record_type.name);
        self.types.push(record_type);
    }

    /// Registry with the archival object, classification and agent types
    pub fn standard() -> Self {
        let mut registry = Self::new("archival_object");

        registry.register(RecordType {
            name: "archival_object",
            table: "archival_objects",
            uri_segment: "archival_objects",
            scope: Scope::Repository,
            schema: RecordSchema::new(vec![
                FieldSpec::required("title", FieldKind::String),
                FieldSpec::optional("ref_id", FieldKind::String),
                FieldSpec::optional("level", FieldKind::String),
                FieldSpec::optional("component_id", FieldKind::String),
                FieldSpec::optional("position", FieldKind::Integer),
                FieldSpec::optional("publish", FieldKind::Boolean),
                FieldSpec::optional("parent", FieldKind::Ref(&["archival_object"])),
                FieldSpec::optional("linked_agents", FieldKind::RefList(AGENT_TYPES)),
                FieldSpec::optional(
                    "classifications",
                    FieldKind::RefList(&["classification", "classification_term"]),
                ),
                FieldSpec::optional("dates", FieldKind::Array),
                FieldSpec::optional("notes", FieldKind::Array),
            ]),
            identifier_field: Some("ref_id"),
        });

        registry.register(RecordType {
            name: "classification",
            table: "classifications",
            uri_segment: "classifications",
            scope: Scope::Repository,
            schema: RecordSchema::new(vec![
                FieldSpec::required("identifier", FieldKind::String),
                FieldSpec::required("title", FieldKind::String),
                FieldSpec::optional("description", FieldKind::String),
                FieldSpec::optional("publish", FieldKind::Boolean),
                FieldSpec::optional("creator", FieldKind::Ref(AGENT_TYPES)),
            ]),
            identifier_field: Some("identifier"),
        });

        registry.register(RecordType {
            name: "classification_term",
            table: "classification_terms",
            uri_segment: "classification_terms",
            scope: Scope::Repository,
            schema: RecordSchema::new(vec![
                FieldSpec::required("identifier", FieldKind::String),
                FieldSpec::required("title", FieldKind::String),
                FieldSpec::optional("description", FieldKind::String),
                FieldSpec::optional("position", FieldKind::Integer),
                FieldSpec::optional("publish", FieldKind::Boolean),
                FieldSpec::required("classification", FieldKind::Ref(&["classification"])),
                FieldSpec::optional("parent", FieldKind::Ref(&["classification_term"])),
                FieldSpec::optional("creator", FieldKind::Ref(AGENT_TYPES)),
            ]),
            identifier_field: Some("identifier"),
        });

        for (name, table, segment) in [
            ("agent_person", "agent_person", "agents/people"),
            ("agent_family", "agent_family", "agents/families"),
            ("agent_corporate_entity", "agent_corporate_entity", "agents/corporate_entities"),
            ("agent_software", "agent_software", "agents/software"),
        ] {
            registry.register(RecordType {
                name,
                table,
                uri_segment: segment,
                scope: Scope::Global,
                schema: RecordSchema::new(vec![
                    FieldSpec::required("names", FieldKind::NameList),
                    FieldSpec::optional("dates_of_existence", FieldKind::Array),
                    FieldSpec::optional("agent_contacts", FieldKind::Array),
                    FieldSpec::optional("publish", FieldKind::Boolean),
                ]),
                identifier_field: None,
            });
        }

        registry
    }

    /// Look up a type by `jsonmodel_type` name
    pub fn get(&self, name: &str) -> Option<&RecordType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Type assumed for records that do not declare one
    pub fn default_type(&self) -> Option<&RecordType> {
        self.get(self.default_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.iter()
    }

    /// Registered agent types
    pub fn agent_types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.iter().filter(|t| t.is_agent())
    }

    pub fn is_agent_type(&self, name: &str) -> bool {
        self.get(name).map(RecordType::is_agent).unwrap_or(false)
    }

    /// Canonical URI of a persisted record
    pub fn uri_for(record_type: &RecordType, repo_id: i64, id: i64) -> String {
        match record_type.scope {
            Scope::Repository => {
                format!("/repositories/{}/{}/{}", repo_id, record_type.uri_segment, id)
            }
            Scope::Global => format!("/{}/{}", record_type.uri_segment, id),
        }
    }

    /// Parse a persisted-record URI.
    ///
    /// Returns `None` for anything that does not name a registered type with
    /// a positive numeric id (including client-side logical URIs such as
    /// `/repositories/import/archival_objects/import_1`).
    pub fn parse_reference(&self, uri: &str) -> Option<ParsedReference> {
        let path = uri.strip_prefix('/')?;
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 2 {
            return None;
        }

        let id: i64 = parts[parts.len() - 1].parse().ok().filter(|id| *id > 0)?;

        let (repo_id, segment) = if parts[0] == "repositories" {
            if parts.len() < 4 {
                return None;
            }
            let repo_id: i64 = parts[1].parse().ok().filter(|id| *id > 0)?;
            (Some(repo_id), parts[2..parts.len() - 1].join("/"))
        } else {
            (None, parts[..parts.len() - 1].join("/"))
        };

        let record_type = self.types.iter().find(|t| {
            t.uri_segment == segment
                && match t.scope {
                    Scope::Repository => repo_id.is_some(),
                    Scope::Global => repo_id.is_none(),
                }
        })?;

        Some(ParsedReference {
            record_type: record_type.name,
            id,
            repo_id,
        })
    }
}
