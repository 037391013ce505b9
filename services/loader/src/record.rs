//! Canonical fact record and the other values that flow between components

use crate::fingerprint::{fingerprint, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance discriminator, stored as `"api"` / `"file"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    File,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::File => "file",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized fact ready for insertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRecord {
    pub category: String,
    pub element: String,
    pub year: Option<i32>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub raw_payload: serde_json::Value,
    pub source_kind: SourceKind,
    pub source_reference: String,
    pub fingerprint: String,
}

impl FactRecord {
    /// Build a record and compute its fingerprint from the identity fields
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        category: &str,
        element: String,
        year: Option<i32>,
        value: Option<f64>,
        unit: Option<String>,
        raw_payload: serde_json::Value,
        source_kind: SourceKind,
        source_reference: &str,
    ) -> Self {
        let fingerprint = fingerprint(&Identity {
            category,
            element: &element,
            year,
            value,
            unit: unit.as_deref(),
            reference: source_reference,
        });
        Self {
            category: category.to_string(),
            element,
            year,
            value,
            unit,
            raw_payload,
            source_kind,
            source_reference: source_reference.to_string(),
            fingerprint,
        }
    }
}

/// What a loader hands back to the pipeline
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: Vec<FactRecord>,
    /// Offset to persist as the checkpoint once the batch is stored
    pub next_offset: i64,
    /// Source records/rows skipped because they failed to transform
    pub skipped: usize,
    /// Non-fatal conditions the caller should log (no mapping, empty file)
    pub warnings: Vec<String>,
}

/// Status transitions of a run log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fact_record_fingerprint_matches_identity() {
        let record = FactRecord::new(
            "Demografi",
            "Jumlah Penduduk".to_string(),
            Some(2019),
            Some(1200.0),
            Some("Orang".to_string()),
            json!({}),
            SourceKind::Api,
            "res-001",
        );
        assert_eq!(
            record.fingerprint,
            "38c8bcabe5665cf470e43e312a890542cc2c5c083ca092203863d2658a47e040"
        );
    }

    #[test]
    fn test_raw_payload_not_part_of_identity() {
        let a = FactRecord::new(
            "Demografi",
            "Jumlah Penduduk".to_string(),
            Some(2019),
            Some(1.0),
            None,
            json!({"x": 1}),
            SourceKind::File,
            "data.csv",
        );
        let b = FactRecord::new(
            "Demografi",
            "Jumlah Penduduk".to_string(),
            Some(2019),
            Some(1.0),
            None,
            json!({"x": 2}),
            SourceKind::File,
            "data.csv",
        );
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_source_kind_strings() {
        assert_eq!(SourceKind::Api.as_str(), "api");
        assert_eq!(SourceKind::File.to_string(), "file");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
    }
}
