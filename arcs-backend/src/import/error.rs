//! Import error taxonomy
//!
//! Every failure inside the pipeline is one of these kinds. The kind alone
//! decides whether an attempt may be retried.

use thiserror::Error;

/// Errors raised while spooling, decoding, validating or persisting records
#[derive(Debug, Error)]
pub enum ImportError {
    /// Reading the request body or the spool file failed
    #[error("Failed to spool import stream: {0}")]
    Spool(#[from] std::io::Error),

    /// Malformed record on the wire (1-based record position)
    #[error("Malformed record at position {position}: {message}")]
    Decode { position: usize, message: String },

    /// Record failed its schema
    #[error("Validation failed for {uri}: {}", errors.join("; "))]
    Validation { uri: String, errors: Vec<String> },

    /// Reference names neither a record created earlier in this import nor
    /// an existing record in scope
    #[error("Unresolved reference in {uri}: {field} -> {reference}")]
    UnresolvedReference {
        uri: String,
        field: String,
        reference: String,
    },

    /// Storage rejected the record (constraint violation)
    #[error("Could not save {uri}: {message}")]
    Persistence { uri: String, message: String },

    /// Storage detected a concurrent writer
    #[error("Storage conflict: {0}")]
    Conflict(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ImportError {
    /// Transient failures re-run the whole attempt; everything else is final
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportError::Conflict(_) | ImportError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ImportError::Conflict("database is locked".into()).is_retryable());
        assert!(ImportError::Storage("disk I/O error".into()).is_retryable());

        let terminal = [
            ImportError::Spool(std::io::Error::new(std::io::ErrorKind::Other, "gone")),
            ImportError::Decode {
                position: 2,
                message: "unexpected end of stream".into(),
            },
            ImportError::Validation {
                uri: "b".into(),
                errors: vec!["title: Property is required but was missing".into()],
            },
            ImportError::UnresolvedReference {
                uri: "b".into(),
                field: "parent".into(),
                reference: "zz".into(),
            },
            ImportError::Persistence {
                uri: "b".into(),
                message: "UNIQUE constraint failed".into(),
            },
        ];
        assert!(terminal.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn test_validation_message_joins_errors() {
        let err = ImportError::Validation {
            uri: "b".into(),
            errors: vec!["title: missing".into(), "level: bad".into()],
        };
        assert_eq!(err.to_string(), "Validation failed for b: title: missing; level: bad");
    }
}
