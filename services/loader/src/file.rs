//! File source loader - delimited text and spreadsheets
//!
//! Responsibilities:
//! - Pre-flight validation: sample a few rows and check every mapped field resolves
//! - Read CSV/TSV (configurable delimiter, header, encoding) or the first
//!   sheet of a workbook (xlsx, xls, ods, ...). Workbooks are parsed on the
//!   blocking pool
//! - Turn each row into a header-keyed record and apply the long-mode transform
//! - Skip rows that fail to parse, logging their line number

use crate::config::{CsvOptions, FileSource};
use crate::error::{EtlError, Result};
use crate::extract::{extract, RawRecord};
use crate::record::{LoadOutcome, SourceKind};
use crate::transform::{transform, Mapping, SourceContext};
use calamine::{open_workbook_auto, Data, Range, Reader};
use encoding_rs::Encoding;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows inspected by [`validate`]
pub const VALIDATION_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Delimited { default_delimiter: u8 },
    Spreadsheet,
}

/// Pick the reader from the file extension
fn detect_format(path: &Path) -> Result<FileFormat> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => Ok(FileFormat::Delimited { default_delimiter: b',' }),
        "tsv" => Ok(FileFormat::Delimited { default_delimiter: b'\t' }),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Spreadsheet),
        "" => Err(EtlError::config(format!(
            "cannot determine file type of {} (no extension)",
            path.display()
        ))),
        other => Err(EtlError::config(format!(
            "unsupported file type '.{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Header plus rows; a row is `Err` when it could not be parsed
struct Table {
    columns: Vec<String>,
    rows: Vec<std::result::Result<RawRecord, String>>,
}

async fn read_table(source: &FileSource, max_rows: Option<usize>) -> Result<Table> {
    let path = source.file_path.as_path();
    match detect_format(path)? {
        FileFormat::Delimited { default_delimiter } => {
            read_delimited(path, &source.csv_options, default_delimiter, max_rows).await
        }
        FileFormat::Spreadsheet => {
            let path = path.to_path_buf();
            let has_header = source.csv_options.header;
            tokio::task::spawn_blocking(move || read_spreadsheet(&path, has_header, max_rows))
                .await
                .map_err(std::io::Error::from)?
        }
    }
}

/// 1-based line of data row `idx` in the source file
fn source_line(idx: usize, has_header: bool) -> usize {
    idx + usize::from(has_header) + 1
}

// =============================================================================
// DELIMITED TEXT
// =============================================================================

fn delimiter_byte(options: &CsvOptions, default: u8) -> Result<u8> {
    match options.delimiter.as_deref() {
        None | Some("") => Ok(default),
        Some("\\t") => Ok(b'\t'),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(d) => Err(EtlError::config(format!(
            "csv_options.delimiter must be a single ASCII character, got '{}'",
            d
        ))),
    }
}

/// Decode raw bytes with a WHATWG label, dropping a leading BOM
fn decode(bytes: &[u8], label: &str) -> Result<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EtlError::config(format!("unknown encoding '{}'", label)))?;
    let (text, actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            encoding = actual.name(),
            "Input contained invalid byte sequences, replaced with U+FFFD"
        );
    }
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn parse_delimited(
    content: &str,
    options: &CsvOptions,
    delimiter: u8,
    max_rows: Option<usize>,
) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(options.header)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut columns: Vec<String> = if options.header {
        reader.headers()?.iter().map(|h| h.to_string()).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for result in reader.records().take(max_rows.unwrap_or(usize::MAX)) {
        match result {
            Ok(record) => {
                if !options.header && columns.is_empty() {
                    columns = (0..record.len()).map(|i| i.to_string()).collect();
                }
                let row: RawRecord = record
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        let key = columns.get(i).cloned().unwrap_or_else(|| i.to_string());
                        (key, Value::String(field.to_string()))
                    })
                    .collect();
                rows.push(Ok(row));
            }
            Err(e) => rows.push(Err(e.to_string())),
        }
    }

    Ok(Table { columns, rows })
}

async fn read_delimited(
    path: &Path,
    options: &CsvOptions,
    default_delimiter: u8,
    max_rows: Option<usize>,
) -> Result<Table> {
    let delimiter = delimiter_byte(options, default_delimiter)?;
    let bytes = tokio::fs::read(path).await?;
    let content = decode(&bytes, &options.encoding)?;
    debug!(path = %path.display(), bytes = bytes.len(), "Read delimited file");
    parse_delimited(&content, options, delimiter, max_rows)
}

// =============================================================================
// SPREADSHEET
// =============================================================================

/// Map a spreadsheet cell onto the JSON shape the transform expects
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        other => Value::String(format!("{}", other)),
    }
}

fn header_name(cell: &Data, index: usize) -> String {
    let name = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => format!("{}", other),
    };
    if name.is_empty() {
        index.to_string()
    } else {
        name
    }
}

fn read_spreadsheet(path: &Path, has_header: bool, max_rows: Option<usize>) -> Result<Table> {
    // calamine auto-detects xls, xlsx, xlsb, ods
    let mut workbook = open_workbook_auto(path)?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| EtlError::config(format!("{} has no sheets", path.display())))?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let (row_count, col_count) = range.get_size();
    debug!(
        path = %path.display(),
        sheet = %sheet_name,
        rows = row_count,
        cols = col_count,
        "Read spreadsheet"
    );

    Ok(table_from_range(&range, has_header, max_rows))
}

/// Rows of a sheet keyed by the header row, or by position without one
fn table_from_range(range: &Range<Data>, has_header: bool, max_rows: Option<usize>) -> Table {
    let mut sheet_rows = range.rows();
    let columns: Vec<String> = if has_header {
        match sheet_rows.next() {
            Some(header) => header
                .iter()
                .enumerate()
                .map(|(i, cell)| header_name(cell, i))
                .collect(),
            None => Vec::new(),
        }
    } else {
        (0..range.width()).map(|i| i.to_string()).collect()
    };

    let rows = sheet_rows
        .take(max_rows.unwrap_or(usize::MAX))
        .map(|row| {
            Ok(row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let key = columns.get(i).cloned().unwrap_or_else(|| i.to_string());
                    (key, cell_to_value(cell))
                })
                .collect())
        })
        .collect();

    Table { columns, rows }
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub columns: Vec<String>,
    pub sampled_rows: usize,
}

/// Check that the file can be read and every mapped field resolves.
///
/// Never fails: problems are reported in `errors` with `valid = false`.
pub async fn validate(source: &FileSource) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mapping = match Mapping::resolve_long(&source.mapping) {
        Ok(m) => Some(m),
        Err(e) => {
            report.errors.push(e.to_string());
            None
        }
    };

    if !tokio::fs::try_exists(&source.file_path).await.unwrap_or(false) {
        report
            .errors
            .push(format!("File not found: {}", source.file_path.display()));
        return report;
    }

    let table = match read_table(source, Some(VALIDATION_SAMPLE_ROWS)).await {
        Ok(t) => t,
        Err(e) => {
            report.errors.push(format!(
                "Failed to read {}: {}",
                source.file_path.display(),
                e
            ));
            return report;
        }
    };
    report.columns = table.columns.clone();
    report.sampled_rows = table.rows.len();

    let Some(mapping) = mapping else {
        return report;
    };

    // First parsed sample row, or the bare header when the file has no data
    let probe: RawRecord = table
        .rows
        .iter()
        .find_map(|r| r.as_ref().ok().cloned())
        .unwrap_or_else(|| {
            table
                .columns
                .iter()
                .map(|c| (c.clone(), Value::Null))
                .collect()
        });

    for (key, path) in mapping.field_paths() {
        if extract(&probe, path).is_none() {
            report.errors.push(format!(
                "Mapped field '{}' ({}) not found. Available columns: [{}]",
                path,
                key,
                table.columns.join(", ")
            ));
        }
    }

    report.valid = report.errors.is_empty();
    report
}

// =============================================================================
// LOAD
// =============================================================================

/// Load canonical records from a file source.
///
/// `resume_offset` skips that many data rows. The returned `next_offset` is
/// the number of data rows in the file.
pub async fn load(source: &FileSource, resume_offset: i64) -> Result<LoadOutcome> {
    let mapping = Mapping::resolve_long(&source.mapping)?;
    let reference = source.file_name();
    let ctx = SourceContext {
        category: &source.kategori,
        kind: SourceKind::File,
        reference: &reference,
    };

    let table = read_table(source, None).await?;
    let skip = usize::try_from(resume_offset.max(0)).unwrap_or(usize::MAX);

    let mut outcome = LoadOutcome::default();
    for (idx, row) in table.rows.iter().enumerate().skip(skip) {
        match row {
            Ok(record) => outcome.records.extend(transform(&mapping, record, &ctx)),
            Err(e) => {
                outcome.skipped += 1;
                warn!(
                    file = %reference,
                    row = source_line(idx, source.csv_options.header),
                    error = %e,
                    "Skipping unparsable row"
                );
            }
        }
    }

    outcome.next_offset = i64::try_from(table.rows.len())
        .unwrap_or(i64::MAX)
        .max(resume_offset);

    if outcome.records.is_empty() {
        outcome
            .warnings
            .push(format!("no records found in {}", reference));
    }

    info!(
        file = %reference,
        rows = table.rows.len(),
        resumed_at = skip,
        records = outcome.records.len(),
        skipped = outcome.skipped,
        "Loaded file source"
    );

    Ok(outcome)
}
