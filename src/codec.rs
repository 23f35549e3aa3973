//! Cassette document encoding
//!
//! A cassette is a single JSON object:
//!
//! ```json
//! {
//!   "Entries": [ { "RequestUri": "...", "RequestMethod": "GET", ... } ],
//!   "Variables": { "DateTimeOffsetNow": "2020-01-01T00:00:00Z" }
//! }
//! ```
//!
//! Older cassettes may also carry `Names`, a map of string queues. It is read
//! into the session but never written back.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use crate::entry::Entry;
use crate::session::{Session, Variables};
use crate::{CassetteError, Result};

const ENTRIES: &str = "Entries";
const VARIABLES: &str = "Variables";
const NAMES: &str = "Names";

/// Encode a session as a cassette document
///
/// Entries are written in recording order; removed entries are left out.
#[must_use]
pub fn serialize(session: &Session) -> Value {
    let entries: Vec<Value> = session.entries().iter().map(Entry::to_value).collect();

    let variables: Map<String, Value> = session
        .variables()
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();

    let mut document = Map::new();
    document.insert(ENTRIES.to_string(), Value::Array(entries));
    document.insert(VARIABLES.to_string(), Value::Object(variables));
    Value::Object(document)
}

/// Decode a cassette document into a session
///
/// Each entry's index is its position in `Entries`. A missing `Entries`
/// array yields an empty session; any malformed entry fails the whole load.
///
/// # Errors
///
/// Returns `Deserialization` if the document or any entry is malformed
pub fn deserialize(document: &Value) -> Result<Session> {
    let Value::Object(root) = document else {
        return Err(CassetteError::Deserialization(
            "cassette must be a JSON object".to_string(),
        ));
    };

    let entries = match root.get(ENTRIES) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                Entry::from_value(item).map_err(|e| {
                    CassetteError::Deserialization(format!("{ENTRIES}[{i}]: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(CassetteError::Deserialization(format!(
                "{ENTRIES} must be an array"
            )))
        }
    };

    let mut variables = Variables::new();
    if let Some(value) = root.get(VARIABLES) {
        for (name, value) in expect_object(value, VARIABLES)? {
            let value = value.as_str().ok_or_else(|| {
                CassetteError::Deserialization(format!("{VARIABLES}.{name} must be a string"))
            })?;
            variables.insert(name.clone(), value);
        }
    }

    let mut names = HashMap::new();
    if let Some(value) = root.get(NAMES) {
        for (name, queue) in expect_object(value, NAMES)? {
            let Value::Array(items) = queue else {
                return Err(CassetteError::Deserialization(format!(
                    "{NAMES}.{name} must be an array"
                )));
            };
            let queue = items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        CassetteError::Deserialization(format!(
                            "{NAMES}.{name} must contain strings"
                        ))
                    })
                })
                .collect::<Result<VecDeque<_>>>()?;
            names.insert(name.clone(), queue);
        }
    }

    Ok(Session::from_parts(entries, variables, names))
}

fn expect_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CassetteError::Deserialization(format!("{field} must be an object")))
}

/// Encode a session as pretty-printed JSON text
///
/// # Errors
///
/// Returns error if JSON encoding fails
pub fn to_string(session: &Session) -> Result<String> {
    Ok(serde_json::to_string_pretty(&serialize(session))?)
}

/// Decode a session from JSON text
///
/// # Errors
///
/// Returns error if the text is not JSON or not a valid cassette
pub fn from_str(text: &str) -> Result<Session> {
    let document: Value = serde_json::from_str(text)?;
    deserialize(&document)
}

/// Write a session to a writer as pretty-printed JSON
///
/// # Errors
///
/// Returns error if encoding or writing fails
pub fn write_to<W: Write>(session: &Session, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, &serialize(session))?;
    writer.flush()?;
    Ok(())
}

/// Read a session from a reader
///
/// # Errors
///
/// Returns error if reading fails or the input is not a valid cassette
pub fn read_from<R: Read>(reader: R) -> Result<Session> {
    let document: Value = serde_json::from_reader(reader)?;
    deserialize(&document)
}

/// Save a session to a cassette file, creating parent directories
///
/// # Errors
///
/// Returns error if the file cannot be written
pub fn save(session: &Session, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = to_string(session)?;
    fs::write(path, text)?;

    info!(
        "Saved cassette '{}': {} entries",
        path.display(),
        session.remaining()
    );
    Ok(())
}

/// Load a session from a cassette file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a valid cassette
pub fn load(path: &Path) -> Result<Session> {
    let text = fs::read_to_string(path)?;
    let session = from_str(&text)?;

    info!(
        "Loaded cassette '{}': {} entries",
        path.display(),
        session.len()
    );
    Ok(session)
}
