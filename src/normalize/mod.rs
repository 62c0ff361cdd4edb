//! Response normalization.
//!
//! Turns one page's nested JSON envelope into a lazy sequence of flat
//! records. Result arrays sit under entity-dependent keys of the
//! `QueryResponse` envelope, so extraction takes every element of every
//! array found there and discards non-object candidates (pagination
//! metadata siblings match the same shape).
//!
//! Each record's nested `MetaData` timestamps are copied into synthetic
//! dotted top-level fields so the replication cursor reads uniformly across
//! entity shapes. Numbers are carried with serde_json's arbitrary-precision
//! representation; monetary amounts never pass through f64.

use serde_json::Value;

use crate::error::SyncError;

/// Top-level key wrapping every query response.
pub const ENVELOPE_KEY: &str = "QueryResponse";

/// Nested metadata object present on most entities.
const METADATA_KEY: &str = "MetaData";

/// Metadata leaves flattened into synthetic top-level fields.
const METADATA_FIELDS: [&str; 2] = ["LastUpdatedTime", "CreateTime"];

/// A flat record: field name to value, including synthetic
/// `MetaData.LastUpdatedTime` / `MetaData.CreateTime` fields when present.
pub type Record = serde_json::Map<String, Value>;

/// Parses one page body, verifying the result envelope is present and every
/// numeric leaf survived parsing losslessly.
pub fn parse_page(stream: &str, body: &str) -> Result<Value, SyncError> {
    let page: Value = serde_json::from_str(body).map_err(|e| SyncError::MalformedResponse {
        stream: stream.to_string(),
        message: format!("invalid JSON: {}", e),
    })?;

    if !page.get(ENVELOPE_KEY).is_some_and(Value::is_object) {
        return Err(SyncError::MalformedResponse {
            stream: stream.to_string(),
            message: format!("missing {} envelope", ENVELOPE_KEY),
        });
    }

    check_numeric_fidelity(stream, &page)?;
    Ok(page)
}

/// Verifies every numeric leaf round-trips through its textual form
/// unchanged. A literal failing this would corrupt monetary amounts
/// downstream, so it fails the page loudly instead.
fn check_numeric_fidelity(stream: &str, value: &Value) -> Result<(), SyncError> {
    match value {
        Value::Number(n) => {
            let rendered = n.to_string();
            match rendered.parse::<serde_json::Number>() {
                Ok(reparsed) if reparsed == *n => Ok(()),
                _ => Err(SyncError::PrecisionLoss {
                    stream: stream.to_string(),
                    value: rendered,
                }),
            }
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|v| check_numeric_fidelity(stream, v)),
        Value::Object(map) => map
            .values()
            .try_for_each(|v| check_numeric_fidelity(stream, v)),
        _ => Ok(()),
    }
}

/// Returns a lazy iterator over the flat records of one parsed page.
///
/// Forward-only and tied to the page's lifetime; replaying the same page
/// yields an identical sequence.
pub fn records_from_page(page: &Value) -> PageRecords<'_> {
    let envelope = page
        .get(ENVELOPE_KEY)
        .and_then(Value::as_object)
        .map(|m| m.values());
    PageRecords {
        envelope,
        current: [].iter(),
    }
}

/// Lazy record iterator for one page. See [`records_from_page`].
pub struct PageRecords<'a> {
    envelope: Option<serde_json::map::Values<'a>>,
    current: std::slice::Iter<'a, Value>,
}

impl<'a> Iterator for PageRecords<'a> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        loop {
            if let Some(candidate) = self.current.next() {
                // Non-object candidates are pagination metadata, not records.
                if let Value::Object(row) = candidate {
                    return Some(flatten_metadata(row));
                }
                continue;
            }
            match self.envelope.as_mut()?.next() {
                Some(Value::Array(items)) => self.current = items.iter(),
                Some(_) => continue,
                None => {
                    self.envelope = None;
                    return None;
                }
            }
        }
    }
}

/// Copies nested `MetaData` timestamp leaves into synthetic dotted top-level
/// fields. The nested object is left intact; absent leaves stay unset.
fn flatten_metadata(row: &Record) -> Record {
    let mut record = row.clone();
    if let Some(Value::Object(metadata)) = row.get(METADATA_KEY) {
        for field in METADATA_FIELDS {
            if let Some(value) = metadata.get(field) {
                record.insert(format!("{}.{}", METADATA_KEY, field), value.clone());
            }
        }
    }
    record
}
