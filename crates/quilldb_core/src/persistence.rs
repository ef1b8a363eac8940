//! Append-only log persistence.
//!
//! The datafile is a UTF-8 text file holding one event per line:
//!
//! ```text
//! {"_id":"...", ...}                                    document record
//! {"$$deleted":true,"_id":"..."}                        deletion record
//! {"$$indexCreated":{"fieldName":"...","unique":true}}  index creation
//! {"$$indexRemoved":"..."}                              index removal
//! ```
//!
//! Loading folds events in file order: later document records for the same
//! `_id` overwrite earlier ones and deletion records drop them. Undecodable
//! lines are tolerated up to `corrupt_alert_threshold`, past which the load
//! aborts so silent data loss cannot look like success. After a successful
//! fold, the caller rewrites a compacted snapshot through the backend's
//! crash-safe replacement.

use crate::error::{DbError, DbResult};
use crate::index::IndexSpec;
use quilldb_codec::{deserialize, serialize, Value};
use quilldb_storage::StorageBackend;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const DELETED_KEY: &str = "$$deleted";
const INDEX_CREATED_KEY: &str = "$$indexCreated";
const INDEX_REMOVED_KEY: &str = "$$indexRemoved";

/// One event in the append-only log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// A live version of a document.
    Doc(Value),
    /// A deletion of the document with the given `_id`.
    Deleted(String),
    /// Declaration of an index.
    IndexCreated(IndexSpec),
    /// Removal of the index with the given name.
    IndexRemoved(String),
}

/// Encodes an event as one log line (without the trailing newline).
pub fn encode_event(event: &LogEvent) -> String {
    match event {
        LogEvent::Doc(doc) => serialize(doc),
        LogEvent::Deleted(id) => {
            let record = Value::object([
                (DELETED_KEY, Value::Bool(true)),
                ("_id", Value::String(id.clone())),
            ]);
            serialize(&record)
        }
        LogEvent::IndexCreated(spec) => {
            let field_name = if spec.fields.len() == 1 {
                Value::String(spec.fields[0].clone())
            } else {
                Value::Array(spec.fields.iter().cloned().map(Value::String).collect())
            };
            let mut decl = vec![("fieldName", field_name)];
            if spec.unique {
                decl.push(("unique", Value::Bool(true)));
            }
            if spec.sparse {
                decl.push(("sparse", Value::Bool(true)));
            }
            if let Some(seconds) = spec.expire_after_seconds {
                decl.push(("expireAfterSeconds", Value::Number(seconds)));
            }
            serialize(&Value::object([(INDEX_CREATED_KEY, Value::object(decl))]))
        }
        LogEvent::IndexRemoved(name) => serialize(&Value::object([(
            INDEX_REMOVED_KEY,
            Value::String(name.clone()),
        )])),
    }
}

/// Decodes one log line.
///
/// # Errors
///
/// Returns [`quilldb_codec::CodecError::MalformedLine`] (wrapped) for lines
/// that are not valid events; the loader counts these against the
/// corruption threshold.
pub fn decode_line(line: &str) -> DbResult<LogEvent> {
    let value = deserialize(line)?;
    let Value::Map(map) = &value else {
        return Err(malformed("event is not a document"));
    };

    if map.get(DELETED_KEY) == Some(&Value::Bool(true)) {
        let id = map
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("deletion record without _id"))?;
        return Ok(LogEvent::Deleted(id.to_string()));
    }

    if let Some(decl) = map.get(INDEX_CREATED_KEY) {
        return decode_index_spec(decl).map(LogEvent::IndexCreated);
    }

    if let Some(name) = map.get(INDEX_REMOVED_KEY) {
        let name = name
            .as_str()
            .ok_or_else(|| malformed("index removal without a name"))?;
        return Ok(LogEvent::IndexRemoved(name.to_string()));
    }

    if map.get("_id").and_then(Value::as_str).is_none() {
        return Err(malformed("document record without _id"));
    }
    Ok(LogEvent::Doc(value))
}

fn decode_index_spec(decl: &Value) -> DbResult<IndexSpec> {
    let fields = match decl.get("fieldName") {
        Some(Value::String(path)) => vec![path.clone()],
        Some(Value::Array(paths)) => {
            let mut fields = Vec::with_capacity(paths.len());
            for path in paths {
                match path.as_str() {
                    Some(path) => fields.push(path.to_string()),
                    None => return Err(malformed("compound fieldName entries must be strings")),
                }
            }
            if fields.is_empty() {
                return Err(malformed("index declaration without fields"));
            }
            fields
        }
        _ => return Err(malformed("index declaration without fieldName")),
    };

    Ok(IndexSpec {
        fields,
        unique: decl.get("unique").and_then(Value::as_bool).unwrap_or(false),
        sparse: decl.get("sparse").and_then(Value::as_bool).unwrap_or(false),
        expire_after_seconds: decl.get("expireAfterSeconds").and_then(Value::as_number),
    })
}

fn malformed(message: &str) -> DbError {
    DbError::Codec(quilldb_codec::CodecError::malformed_line(message))
}

/// The state folded out of a datafile.
#[derive(Debug, Default)]
pub struct LoadedState {
    /// Live documents keyed by `_id`.
    pub docs: BTreeMap<String, Value>,
    /// Index declarations still in effect.
    pub indexes: Vec<IndexSpec>,
    /// Number of undecodable lines that were skipped.
    pub corrupt: usize,
}

/// Reads the datafile and folds its events.
///
/// # Errors
///
/// Returns [`DbError::LoadCorrupted`] when the fraction of undecodable
/// lines exceeds `corrupt_alert_threshold`, and any backend error
/// unmodified.
pub fn load(
    backend: &mut dyn StorageBackend,
    corrupt_alert_threshold: f64,
) -> DbResult<LoadedState> {
    let contents = backend.read_to_string()?;
    let mut state = LoadedState::default();
    let mut total = 0usize;

    for line in contents.split('\n') {
        if line.is_empty() {
            continue;
        }
        total += 1;
        match decode_line(line) {
            Ok(LogEvent::Doc(doc)) => {
                // Decoding guarantees a string _id.
                let id = quilldb_codec::doc_id(&doc).unwrap_or_default().to_string();
                state.docs.insert(id, doc);
            }
            Ok(LogEvent::Deleted(id)) => {
                state.docs.remove(&id);
            }
            Ok(LogEvent::IndexCreated(spec)) => {
                state.indexes.retain(|existing| existing.name() != spec.name());
                state.indexes.push(spec);
            }
            Ok(LogEvent::IndexRemoved(name)) => {
                state.indexes.retain(|existing| existing.name() != name);
            }
            Err(e) => {
                warn!(error = %e, "skipping undecodable datafile line");
                state.corrupt += 1;
            }
        }
    }

    if total > 0 && state.corrupt as f64 / total as f64 > corrupt_alert_threshold {
        return Err(DbError::LoadCorrupted {
            corrupt: state.corrupt,
            total,
            threshold: corrupt_alert_threshold,
        });
    }

    debug!(
        docs = state.docs.len(),
        indexes = state.indexes.len(),
        corrupt = state.corrupt,
        lines = total,
        "datafile loaded"
    );
    Ok(state)
}

/// Appends events as one buffer in a single backend call, flushing when
/// `sync` is set.
///
/// # Errors
///
/// Returns backend errors unmodified.
pub fn append_events(
    backend: &mut dyn StorageBackend,
    events: &[LogEvent],
    sync: bool,
) -> DbResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    let mut buffer = String::new();
    for event in events {
        buffer.push_str(&encode_event(event));
        buffer.push('\n');
    }
    backend.append(buffer.as_bytes(), sync)?;
    Ok(())
}

/// Rewrites the datafile as a compacted snapshot: every live document plus
/// every index declaration (the implicit `_id` index is never logged).
///
/// # Errors
///
/// Returns backend errors unmodified.
pub fn compact<'d>(
    backend: &mut dyn StorageBackend,
    docs: impl Iterator<Item = &'d Value>,
    indexes: &[IndexSpec],
) -> DbResult<()> {
    let mut buffer = String::new();
    let mut doc_count = 0usize;
    for doc in docs {
        buffer.push_str(&serialize(doc));
        buffer.push('\n');
        doc_count += 1;
    }
    for spec in indexes {
        if spec.fields == ["_id"] {
            continue;
        }
        buffer.push_str(&encode_event(&LogEvent::IndexCreated(spec.clone())));
        buffer.push('\n');
    }
    backend.rewrite(buffer.as_bytes())?;
    debug!(docs = doc_count, indexes = indexes.len(), "datafile compacted");
    Ok(())
}
