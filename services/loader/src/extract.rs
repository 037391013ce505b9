//! Dotted field-path lookup over loosely-typed records
//!
//! Records are JSON objects regardless of origin (API payload, CSV row,
//! spreadsheet row). A path such as `"attributes.tahun"` walks nested objects
//! key by key. Absence is a normal outcome and is reported as `None`.

use serde_json::{Map, Value};

/// A loosely-typed source record
pub type RawRecord = Map<String, Value>;

/// Resolve `path` against `record`.
///
/// Returns `None` when the path is empty, a segment is absent, or an
/// intermediate value is not an object.
pub fn extract<'a>(record: &'a RawRecord, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

/// Like [`extract`] but for optional paths (e.g. an unset unit field).
pub fn extract_opt<'a>(record: &'a RawRecord, path: Option<&str>) -> Option<&'a Value> {
    path.and_then(|p| extract(record, p))
}
