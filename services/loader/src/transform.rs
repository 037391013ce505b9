//! Source record → canonical fact transform
//!
//! Two shapes are supported:
//! - Long: one record per (element, year), read from four field paths
//! - Wide: one record per element, years spread over columns whose names
//!   match a regex (`"Data 2019"`, `"Data 2020"`, ...)
//!
//! The mode is resolved once per source. Per-record work never fails on bad
//! cells (they normalize to missing); only a record that is not an object is
//! rejected, and the loaders skip it.

use crate::config::RawMapping;
use crate::error::{EtlError, Result};
use crate::extract::{extract, extract_opt, RawRecord};
use crate::normalize::{clean_string, normalize_float, normalize_int, parse_int_str};
use crate::record::{FactRecord, SourceKind};
use regex::Regex;
use serde_json::Value;

/// Unit column used by wide sources that do not name one
pub const DEFAULT_WIDE_UNIT_FIELD: &str = "Satuan";

#[derive(Debug, Clone)]
pub enum Mapping {
    Long {
        element: String,
        year: String,
        value: String,
        unit: Option<String>,
    },
    Wide {
        element: String,
        year_columns: Regex,
        unit: Option<String>,
    },
}

impl Mapping {
    /// Resolve the configured mapping.
    ///
    /// `year_column_regex` selects wide mode; otherwise `tahun_field` plus
    /// `nilai_field` select long mode. `Ok(None)` means neither is configured,
    /// which callers report as a warning rather than a failure.
    pub fn resolve(raw: &RawMapping) -> Result<Option<Mapping>> {
        let element = required_field(raw.elemen_field.as_deref(), "elemen_field")?;

        if let Some(pattern) = non_empty(raw.year_column_regex.as_deref()) {
            let year_columns = Regex::new(pattern).map_err(|e| {
                EtlError::config(format!("invalid year_column_regex '{}': {}", pattern, e))
            })?;
            if year_columns.captures_len() < 2 {
                return Err(EtlError::config(format!(
                    "year_column_regex '{}' needs a capture group for the year",
                    pattern
                )));
            }
            let unit = non_empty(raw.unit_field.as_deref())
                .or(non_empty(raw.satuan_field.as_deref()))
                .map(str::to_string);
            return Ok(Some(Mapping::Wide {
                element,
                year_columns,
                unit,
            }));
        }

        match (
            non_empty(raw.tahun_field.as_deref()),
            non_empty(raw.nilai_field.as_deref()),
        ) {
            (Some(year), Some(value)) => Ok(Some(Mapping::Long {
                element,
                year: year.to_string(),
                value: value.to_string(),
                unit: non_empty(raw.satuan_field.as_deref())
                    .or(non_empty(raw.unit_field.as_deref()))
                    .map(str::to_string),
            })),
            _ => Ok(None),
        }
    }

    /// File sources only support long mode; anything else is a config error.
    pub fn resolve_long(raw: &RawMapping) -> Result<Mapping> {
        if non_empty(raw.year_column_regex.as_deref()).is_some() {
            return Err(EtlError::config(
                "year_column_regex is not supported for file sources",
            ));
        }
        let element = required_field(raw.elemen_field.as_deref(), "elemen_field")?;
        let year = required_field(raw.tahun_field.as_deref(), "tahun_field")?;
        let value = required_field(raw.nilai_field.as_deref(), "nilai_field")?;
        Ok(Mapping::Long {
            element,
            year,
            value,
            unit: non_empty(raw.satuan_field.as_deref()).map(str::to_string),
        })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Mapping::Long { .. } => "long",
            Mapping::Wide { .. } => "wide",
        }
    }

    /// Configured (config key, path) pairs, for structural validation
    pub fn field_paths(&self) -> Vec<(&'static str, &str)> {
        match self {
            Mapping::Long {
                element,
                year,
                value,
                unit,
            } => {
                let mut paths = vec![
                    ("elemen_field", element.as_str()),
                    ("tahun_field", year.as_str()),
                    ("nilai_field", value.as_str()),
                ];
                if let Some(unit) = unit {
                    paths.push(("satuan_field", unit.as_str()));
                }
                paths
            }
            Mapping::Wide { element, unit, .. } => {
                let mut paths = vec![("elemen_field", element.as_str())];
                if let Some(unit) = unit {
                    paths.push(("unit_field", unit.as_str()));
                }
                paths
            }
        }
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|f| !f.is_empty())
}

fn required_field(field: Option<&str>, name: &str) -> Result<String> {
    non_empty(field)
        .map(str::to_string)
        .ok_or_else(|| EtlError::config(format!("mapping.{} is required", name)))
}

/// Provenance stamped onto every record produced for one source
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub category: &'a str,
    pub kind: SourceKind,
    /// Resource id or file name
    pub reference: &'a str,
}

/// Transform an arbitrary JSON value; non-objects are a record-level error.
pub fn transform_value(
    mapping: &Mapping,
    value: &Value,
    ctx: &SourceContext<'_>,
) -> Result<Vec<FactRecord>> {
    let record = value.as_object().ok_or_else(|| {
        EtlError::transform(format!("expected a JSON object, got {}", json_type(value)))
    })?;
    Ok(transform(mapping, record, ctx))
}

pub fn transform(mapping: &Mapping, record: &RawRecord, ctx: &SourceContext<'_>) -> Vec<FactRecord> {
    match mapping {
        Mapping::Long {
            element,
            year,
            value,
            unit,
        } => transform_long(record, element, year, value, unit.as_deref(), ctx)
            .into_iter()
            .collect(),
        Mapping::Wide {
            element,
            year_columns,
            unit,
        } => transform_wide(record, element, year_columns, unit.as_deref(), ctx),
    }
}

fn transform_long(
    record: &RawRecord,
    element_path: &str,
    year_path: &str,
    value_path: &str,
    unit_path: Option<&str>,
    ctx: &SourceContext<'_>,
) -> Option<FactRecord> {
    let element = extract(record, element_path).and_then(clean_string)?;
    let year = extract(record, year_path).and_then(normalize_int).and_then(to_year);
    let value = extract(record, value_path).and_then(normalize_float);
    let unit = extract_opt(record, unit_path).and_then(clean_string);

    Some(FactRecord::new(
        ctx.category,
        element,
        year,
        value,
        unit,
        Value::Object(record.clone()),
        ctx.kind,
        ctx.reference,
    ))
}

fn transform_wide(
    record: &RawRecord,
    element_path: &str,
    year_columns: &Regex,
    unit_path: Option<&str>,
    ctx: &SourceContext<'_>,
) -> Vec<FactRecord> {
    let Some(element) = extract(record, element_path).and_then(clean_string) else {
        return Vec::new();
    };
    let unit_key = unit_path.unwrap_or(DEFAULT_WIDE_UNIT_FIELD);
    let unit = extract(record, unit_key).and_then(clean_string);
    let payload = Value::Object(record.clone());

    record
        .iter()
        .filter(|(key, _)| key.as_str() != element_path && key.as_str() != unit_key)
        .filter_map(|(key, cell)| {
            let captures = year_columns.captures(key)?;
            let year = captures
                .get(1)
                .and_then(|m| parse_int_str(m.as_str()))
                .and_then(to_year);
            Some(FactRecord::new(
                ctx.category,
                element.clone(),
                year,
                normalize_float(cell),
                unit.clone(),
                payload.clone(),
                ctx.kind,
                ctx.reference,
            ))
        })
        .collect()
}

fn to_year(n: i64) -> Option<i32> {
    i32::try_from(n).ok()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
