//! Created-record mapping and the import outcome

use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

use super::error::ImportError;

/// Persisted identity of an imported record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub uri: String,
    pub id: i64,
}

impl Serialize for PersistedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.uri)?;
        tuple.serialize_element(&self.id)?;
        tuple.end()
    }
}

/// Logical identifier → persisted identity, in creation order.
///
/// Serializes as a JSON object: `{"a": ["/repositories/2/archival_objects/1", 1]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedRecords {
    entries: Vec<(String, PersistedRecord)>,
    index: HashMap<String, usize>,
}

impl CreatedRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created record; returns false if the logical id was taken
    pub fn insert(&mut self, logical_uri: String, record: PersistedRecord) -> bool {
        if self.index.contains_key(&logical_uri) {
            return false;
        }
        self.index.insert(logical_uri.clone(), self.entries.len());
        self.entries.push((logical_uri, record));
        true
    }

    pub fn get(&self, logical_uri: &str) -> Option<&PersistedRecord> {
        self.index.get(logical_uri).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, logical_uri: &str) -> bool {
        self.index.contains_key(logical_uri)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PersistedRecord)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for CreatedRecords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (logical, record) in &self.entries {
            map.serialize_entry(logical, record)?;
        }
        map.end()
    }
}

/// Final result of one import request
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub saved: CreatedRecords,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ImportOutcome {
    pub fn success(saved: CreatedRecords) -> Self {
        Self { saved, errors: None }
    }

    /// Outcome for a terminal error, keeping whatever was committed
    pub fn failure(saved: CreatedRecords, error: &ImportError) -> Self {
        Self::from_message(saved, &error.to_string())
    }

    pub fn from_message(saved: CreatedRecords, message: &str) -> Self {
        Self {
            saved,
            errors: Some(vec![format!("Server error: {}", message)]),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_none()
    }
}
