//! Record schemas
//!
//! Each record type declares the fields it understands. Validation checks
//! presence of required fields and the JSON shape of every declared field;
//! undeclared fields are carried through untouched.

use serde_json::{Map, Value};

/// Shape of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Array,
    Object,
    /// Single reference to a record of one of the listed types
    Ref(&'static [&'static str]),
    /// Array of references to records of the listed types
    RefList(&'static [&'static str]),
    /// Non-empty array of name objects, each carrying a `sort_name`
    NameList,
}

/// A declared field of a record schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Field declarations for one record type
#[derive(Debug, Clone, Default)]
pub struct RecordSchema {
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Declared reference fields (single and list)
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Ref(_) | FieldKind::RefList(_)))
    }

    /// Validate a record body, collecting every violation
    pub fn validate(&self, body: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for field in &self.fields {
            match body.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(format!(
                            "{}: Property is required but was missing",
                            field.name
                        ));
                    }
                }
                Some(value) => {
                    if let Err(msg) = check_kind(field, value) {
                        errors.push(format!("{}: {}", field.name, msg));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_kind(field: &FieldSpec, value: &Value) -> Result<(), String> {
    match field.kind {
        FieldKind::String => match value.as_str() {
            Some(s) if field.required && s.trim().is_empty() => {
                Err("Property is required but was missing".to_string())
            }
            Some(_) => Ok(()),
            None => Err("Property was expected to be a string".to_string()),
        },
        FieldKind::Integer => {
            if value.is_i64() || value.is_u64() {
                Ok(())
            } else {
                Err("Property was expected to be an integer".to_string())
            }
        }
        FieldKind::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err("Property was expected to be a boolean".to_string())
            }
        }
        FieldKind::Array => {
            if value.is_array() {
                Ok(())
            } else {
                Err("Property was expected to be an array".to_string())
            }
        }
        FieldKind::Object => {
            if value.is_object() {
                Ok(())
            } else {
                Err("Property was expected to be an object".to_string())
            }
        }
        FieldKind::Ref(_) => match ref_value(value) {
            Some(_) => Ok(()),
            None => Err("Property was expected to be a reference".to_string()),
        },
        FieldKind::RefList(_) => {
            let items = value
                .as_array()
                .ok_or_else(|| "Property was expected to be an array of references".to_string())?;
            for (i, item) in items.iter().enumerate() {
                if ref_value(item).is_none() {
                    return Err(format!("Element {} was expected to be a reference", i));
                }
            }
            Ok(())
        }
        FieldKind::NameList => {
            let names = value
                .as_array()
                .ok_or_else(|| "Property was expected to be an array of names".to_string())?;
            if names.is_empty() {
                return Err("At least one name is required".to_string());
            }
            for (i, name) in names.iter().enumerate() {
                let sort_name = name.get("sort_name").and_then(Value::as_str);
                match sort_name {
                    Some(s) if !s.trim().is_empty() => {}
                    _ => return Err(format!("Name {} is missing a sort_name", i)),
                }
            }
            Ok(())
        }
    }
}

/// Extract the URI of a reference value.
///
/// References appear either as a bare string or as `{"ref": "<uri>"}`.
pub fn ref_value(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.as_str()),
        Value::Object(obj) => obj
            .get("ref")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}
