//! Record decoder
//!
//! Reads import records one at a time from a spooled stream. The stream is
//! either a single JSON array of objects or a sequence of JSON objects
//! separated by whitespace (one per line, typically). Records are split at
//! the byte level so that only one record is held in memory at a time, then
//! decoded with `serde_json` and validated against the record type schema.

use arcs_common::registry::{RecordType, RecordTypeRegistry};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::error::ImportError;

/// One decoded, validated record
#[derive(Debug, Clone)]
pub struct ImportRecord<'r> {
    /// 1-based position in the stream
    pub position: usize,
    /// Caller-supplied identifier (`uri`, or `id`)
    pub logical_uri: String,
    pub record_type: &'r RecordType,
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitState {
    /// Nothing but whitespace seen yet
    Start,
    /// Inside `[`, expecting a record or `]`
    ArrayOpen,
    /// Inside `[`, after a `,`
    ArrayComma,
    /// Inside `[`, after a record
    ArrayAfterRecord,
    /// Past the closing `]`
    ArrayClosed,
    /// Between records of an object sequence
    Sequence,
    /// Inside a record
    Record,
}

/// Finds top-level record boundaries in a byte stream
#[derive(Debug)]
struct RecordSplitter {
    state: SplitState,
    in_array: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
    current: Vec<u8>,
}

impl RecordSplitter {
    fn new() -> Self {
        Self {
            state: SplitState::Start,
            in_array: false,
            depth: 0,
            in_string: false,
            escaped: false,
            current: Vec::new(),
        }
    }

    fn start_record(&mut self, byte: u8) {
        self.state = SplitState::Record;
        self.depth = 1;
        self.in_string = false;
        self.escaped = false;
        self.current.clear();
        self.current.push(byte);
    }

    /// Feed one byte; `Ok(true)` when a record just completed
    fn push(&mut self, byte: u8) -> Result<bool, String> {
        if self.state == SplitState::Record {
            self.current.push(byte);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                return Ok(false);
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.state = if self.in_array {
                            SplitState::ArrayAfterRecord
                        } else {
                            SplitState::Sequence
                        };
                        return Ok(true);
                    }
                }
                _ => {}
            }
            return Ok(false);
        }

        if byte.is_ascii_whitespace() {
            return Ok(false);
        }

        match (self.state, byte) {
            (SplitState::Start, b'[') => {
                self.in_array = true;
                self.state = SplitState::ArrayOpen;
            }
            (SplitState::Start, b'{')
            | (SplitState::Sequence, b'{')
            | (SplitState::ArrayOpen, b'{')
            | (SplitState::ArrayComma, b'{') => self.start_record(byte),
            (SplitState::ArrayOpen, b']') | (SplitState::ArrayAfterRecord, b']') => {
                self.state = SplitState::ArrayClosed;
            }
            (SplitState::ArrayAfterRecord, b',') => self.state = SplitState::ArrayComma,
            (SplitState::ArrayClosed, _) => {
                return Err("unexpected data after the closing ']'".to_string());
            }
            (SplitState::ArrayAfterRecord, _) => {
                return Err(format!("expected ',' or ']' but found '{}'", byte as char));
            }
            (SplitState::ArrayComma, b']') => {
                return Err("trailing ',' before ']'".to_string());
            }
            (SplitState::Start, _) => {
                return Err(format!(
                    "expected a JSON array or object but found '{}'",
                    byte as char
                ));
            }
            (_, _) => {
                return Err(format!("expected a JSON object but found '{}'", byte as char));
            }
        }
        Ok(false)
    }

    /// Check the stream ended at a record boundary
    fn finish(&self) -> Result<(), String> {
        match self.state {
            SplitState::Start | SplitState::Sequence | SplitState::ArrayClosed => Ok(()),
            SplitState::Record => Err("unexpected end of stream inside a record".to_string()),
            SplitState::ArrayOpen | SplitState::ArrayComma | SplitState::ArrayAfterRecord => {
                Err("unexpected end of stream: array was not closed".to_string())
            }
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.current)
    }
}

/// Lazy reader of validated import records
pub struct RecordReader<'r, R> {
    reader: R,
    registry: &'r RecordTypeRegistry,
    splitter: RecordSplitter,
    position: usize,
    seen: HashSet<String>,
    done: bool,
}

impl<'r, R> RecordReader<'r, R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, registry: &'r RecordTypeRegistry) -> Self {
        Self {
            reader,
            registry,
            splitter: RecordSplitter::new(),
            position: 0,
            seen: HashSet::new(),
            done: false,
        }
    }

    /// Number of records yielded so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Next record, or `None` at the end of the stream
    pub async fn next_record(&mut self) -> Result<Option<ImportRecord<'r>>, ImportError> {
        if self.done {
            return Ok(None);
        }

        match self.next_raw().await? {
            Some(raw) => {
                self.position += 1;
                self.decode(&raw).map(Some)
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    async fn next_raw(&mut self) -> Result<Option<Vec<u8>>, ImportError> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                self.splitter.finish().map_err(|message| ImportError::Decode {
                    position: self.position + 1,
                    message,
                })?;
                return Ok(None);
            }

            let mut consumed = 0;
            let mut complete = false;
            for &byte in buf {
                consumed += 1;
                match self.splitter.push(byte) {
                    Ok(true) => {
                        complete = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(message) => {
                        return Err(ImportError::Decode {
                            position: self.position + 1,
                            message,
                        });
                    }
                }
            }
            self.reader.consume(consumed);

            if complete {
                return Ok(Some(self.splitter.take()));
            }
        }
    }

    fn decode(&mut self, raw: &[u8]) -> Result<ImportRecord<'r>, ImportError> {
        let position = self.position;
        let registry = self.registry;
        let body: Map<String, Value> =
            serde_json::from_slice(raw).map_err(|e| ImportError::Decode {
                position,
                message: e.to_string(),
            })?;

        let logical_uri = match body
            .get("uri")
            .filter(|uri| !uri.is_null())
            .or_else(|| body.get("id"))
        {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ImportError::Validation {
                    uri: format!("record {}", position),
                    errors: vec!["uri: Property is required but was missing".to_string()],
                });
            }
        };

        let record_type = match body.get("jsonmodel_type") {
            None | Some(Value::Null) => registry.default_type(),
            Some(Value::String(name)) => registry.get(name),
            Some(_) => None,
        }
        .ok_or_else(|| ImportError::Validation {
            uri: logical_uri.clone(),
            errors: vec![format!(
                "jsonmodel_type: Unknown record type {}",
                body.get("jsonmodel_type").cloned().unwrap_or(Value::Null)
            )],
        })?;

        if !self.seen.insert(logical_uri.clone()) {
            return Err(ImportError::Validation {
                uri: logical_uri,
                errors: vec!["uri: Logical identifier appears more than once in this import".to_string()],
            });
        }

        record_type
            .schema
            .validate(&body)
            .map_err(|errors| ImportError::Validation {
                uri: logical_uri.clone(),
                errors,
            })?;

        Ok(ImportRecord {
            position,
            logical_uri,
            record_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &str) -> Result<Vec<String>, ImportError> {
        let registry = RecordTypeRegistry::standard();
        let mut reader = RecordReader::new(input.as_bytes(), &registry);
        let mut ids = Vec::new();
        while let Some(record) = reader.next_record().await? {
            ids.push(record.logical_uri);
        }
        Ok(ids)
    }

    fn decode_position(result: Result<Vec<String>, ImportError>) -> usize {
        match result {
            Err(ImportError::Decode { position, .. }) => position,
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_array_of_records() {
        let ids = read_all(r#"[{"id":"a","title":"X"}, {"id":"b","title":"Y"}]"#)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_newline_delimited_records() {
        let ids = read_all("{\"uri\":\"a\",\"title\":\"X\"}\n{\"uri\":\"b\",\"title\":\"Y\"}\n")
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        assert!(read_all("").await.unwrap().is_empty());
        assert!(read_all("  [ ]  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_braces_inside_strings_are_ignored() {
        let input = r#"[{"id":"a","title":"}{ \"quoted\" ][","notes":[{"x":"]"}]}]"#;
        assert_eq!(read_all(input).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_records_split_across_buffer_boundaries() {
        let registry = RecordTypeRegistry::standard();
        let input = r#"[{"id":"a","title":"X"},{"id":"b","title":"Y"}]"#;
        let reader = tokio::io::BufReader::with_capacity(3, input.as_bytes());
        let mut records = RecordReader::new(reader, &registry);

        let first = records.next_record().await.unwrap().unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(first.record_type.name, "archival_object");
        assert_eq!(first.body["title"], "X");
        let second = records.next_record().await.unwrap().unwrap();
        assert_eq!(second.logical_uri, "b");
        assert!(records.next_record().await.unwrap().is_none());
        assert!(records.next_record().await.unwrap().is_none());
        assert_eq!(records.position(), 2);
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let result = read_all(r#"[{"id":"a","title":"X"}, {"id":"b","#).await;
        assert_eq!(decode_position(result), 2);
    }

    #[tokio::test]
    async fn test_unclosed_array() {
        let result = read_all(r#"[{"id":"a","title":"X"}"#).await;
        assert_eq!(decode_position(result), 2);
    }

    #[tokio::test]
    async fn test_non_object_element() {
        let result = read_all(r#"[{"id":"a","title":"X"}, 42]"#).await;
        assert_eq!(decode_position(result), 2);
    }

    #[tokio::test]
    async fn test_trailing_comma_and_garbage() {
        assert_eq!(decode_position(read_all(r#"[{"id":"a","title":"X"},]"#).await), 2);
        assert_eq!(decode_position(read_all(r#"[{"id":"a","title":"X"}] x"#).await), 2);
        assert_eq!(decode_position(read_all("nonsense").await), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_inside_record() {
        let result = read_all(r#"[{"id":"a","title":"X"}, {"id":"b" "title":"Y"}]"#).await;
        assert_eq!(decode_position(result), 2);
    }

    #[tokio::test]
    async fn test_schema_failure_is_validation_error() {
        let result = read_all(r#"[{"id":"a","title":"X"}, {"id":"b"}]"#).await;
        match result {
            Err(ImportError::Validation { uri, errors }) => {
                assert_eq!(uri, "b");
                assert_eq!(errors, vec!["title: Property is required but was missing"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_logical_identifier() {
        let result = read_all(r#"[{"title":"X"}]"#).await;
        assert!(matches!(result, Err(ImportError::Validation { ref uri, .. }) if uri == "record 1"));
    }

    #[tokio::test]
    async fn test_null_uri_falls_back_to_id() {
        let ids = read_all(r#"[{"uri":null,"id":"a","title":"X"}]"#).await.unwrap();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_duplicate_logical_identifier() {
        let result = read_all(r#"[{"id":"a","title":"X"},{"id":"a","title":"Y"}]"#).await;
        assert!(matches!(result, Err(ImportError::Validation { ref uri, .. }) if uri == "a"));
    }

    #[tokio::test]
    async fn test_unknown_record_type() {
        let result = read_all(r#"[{"id":"a","jsonmodel_type":"widget","title":"X"}]"#).await;
        match result {
            Err(ImportError::Validation { errors, .. }) => {
                assert!(errors[0].contains("widget"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_record_types() {
        let input = r#"
            {"uri":"/agents/people/import_1","jsonmodel_type":"agent_person","names":[{"sort_name":"Smith, Jan"}]}
            {"uri":"c1","jsonmodel_type":"classification","identifier":"C1","title":"Letters"}
        "#;
        assert_eq!(
            read_all(input).await.unwrap(),
            vec!["/agents/people/import_1", "c1"]
        );
    }
}
