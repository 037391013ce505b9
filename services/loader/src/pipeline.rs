//! One source, end to end
//!
//! checkpoint → load → caller filters → (dry-run stops here) → upsert →
//! checkpoint → run log. Only the load and the upsert can fail the run;
//! checkpoint and run-log writes are logged and discarded.

use crate::api::ApiClient;
use crate::config::{ApiSource, FileSource, Settings};
use crate::error::{EtlError, Result};
use crate::file;
use crate::record::{FactRecord, LoadOutcome, RunStatus, SourceKind};
use crate::store::{RunCounts, Store, UpsertStats};
use tracing::{info, warn};
use uuid::Uuid;

/// A configured source of either kind
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Api(&'a ApiSource),
    File(&'a FileSource),
}

impl Source<'_> {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Api(_) => SourceKind::Api,
            Source::File(_) => SourceKind::File,
        }
    }

    /// Checkpoint / run-log key: resource id or file name
    pub fn reference(&self) -> String {
        match self {
            Source::Api(s) => s.resource_id.clone(),
            Source::File(s) => s.file_name(),
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Source::Api(s) => &s.kategori,
            Source::File(s) => &s.kategori,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Source::Api(s) => s.enabled,
            Source::File(s) => s.enabled,
        }
    }

    /// Single-source selector: resource id, category, file path or file name
    pub fn matches(&self, selector: &str) -> bool {
        match self {
            Source::Api(s) => s.resource_id == selector || s.kategori == selector,
            Source::File(s) => {
                s.kategori == selector
                    || s.file_name() == selector
                    || s.file_path.to_string_lossy() == selector
            }
        }
    }
}

/// Caller-side options for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Drop records without a year or with a year below this
    pub year_floor: Option<i32>,
    /// Keep at most this many records per source
    pub limit: Option<usize>,
    /// Do everything except writes
    pub dry_run: bool,
    /// Start from the stored checkpoint. When false, a live run clears it
    /// and the source is read from the beginning.
    pub resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            year_floor: None,
            limit: None,
            dry_run: false,
            resume: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub kind: Option<SourceKind>,
    pub reference: String,
    pub start_offset: i64,
    pub next_offset: i64,
    /// Records produced by the loader
    pub loaded: usize,
    /// Records left after filters
    pub kept: usize,
    /// Source records/rows the loader skipped
    pub skipped: usize,
    pub stats: UpsertStats,
    pub checkpoint_saved: bool,
    pub dry_run: bool,
    pub warnings: Vec<String>,
}

/// Apply the year floor, then the record limit
pub fn apply_filters(records: Vec<FactRecord>, options: &RunOptions) -> Vec<FactRecord> {
    let filtered = records.into_iter().filter(|r| match options.year_floor {
        Some(floor) => r.year.is_some_and(|y| y >= floor),
        None => true,
    });
    match options.limit {
        Some(limit) => filtered.take(limit).collect(),
        None => filtered.collect(),
    }
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    api: &'a ApiClient,
    /// `None` only in dry-run without a database
    store: Option<&'a Store>,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings, api: &'a ApiClient, store: Option<&'a Store>) -> Self {
        Self { settings, api, store }
    }

    /// Run one source and record the outcome in the run log.
    ///
    /// Errors are source-level: the caller decides whether to continue with
    /// the remaining sources.
    pub async fn run_source(&self, source: Source<'_>, options: &RunOptions) -> Result<RunSummary> {
        let kind = source.kind();
        let reference = source.reference();

        let run_id = match (self.store, options.dry_run) {
            (Some(store), false) => {
                match store.log_run_started(kind, &reference, source.category()).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        // Run log is observability only
                        warn!(source = %reference, error = %e, "Failed to create run log entry");
                        None
                    }
                }
            }
            _ => None,
        };

        let result = self.execute(source, &reference, options).await;

        if let Some(run_id) = run_id {
            self.finish_run_log(run_id, &reference, &result).await;
        }

        match &result {
            Ok(summary) => info!(
                source = %reference,
                kind = %kind,
                loaded = summary.loaded,
                kept = summary.kept,
                inserted = summary.stats.inserted,
                updated = summary.stats.updated,
                dry_run = summary.dry_run,
                "Source completed"
            ),
            Err(e) => warn!(source = %reference, kind = %kind, error = %e, "Source failed"),
        }

        result
    }

    async fn execute(&self, source: Source<'_>, reference: &str, options: &RunOptions) -> Result<RunSummary> {
        let kind = source.kind();
        let use_checkpoints = self.settings.enable_checkpoints && options.resume;

        let start_offset = match (use_checkpoints, self.store) {
            (true, Some(store)) => store.get_checkpoint(kind, reference).await,
            (false, Some(store)) if !options.resume && !options.dry_run => {
                if let Err(e) = store.reset_checkpoint(kind, reference).await {
                    warn!(source = %reference, error = %e, "Failed to reset checkpoint");
                }
                0
            }
            _ => 0,
        };

        let outcome: LoadOutcome = match source {
            Source::Api(s) => self.api.load(s, start_offset).await?,
            Source::File(s) => file::load(s, start_offset).await?,
        };

        for warning in &outcome.warnings {
            warn!(source = %reference, "{}", warning);
        }

        let loaded = outcome.records.len();
        let records = apply_filters(outcome.records, options);
        // Records dropped by the year floor or the limit were read but never
        // stored; advancing past them would hide them from later runs
        let filtered_out = records.len() < loaded;

        let mut summary = RunSummary {
            kind: Some(kind),
            reference: reference.to_string(),
            start_offset,
            next_offset: outcome.next_offset,
            loaded,
            kept: records.len(),
            skipped: outcome.skipped,
            dry_run: options.dry_run,
            warnings: outcome.warnings,
            ..Default::default()
        };

        if options.dry_run {
            info!(source = %reference, records = records.len(), "Dry run - skipping upsert");
            return Ok(summary);
        }

        let store = self
            .store
            .ok_or_else(|| EtlError::config("no database connection configured"))?;

        let stats = store.upsert(&records).await;
        summary.stats = stats;

        if stats.failed_chunks > 0 {
            return Err(EtlError::Persistence {
                failed_chunks: stats.failed_chunks,
                failed_records: stats.failed_records,
                inserted: stats.inserted,
                updated: stats.updated,
            });
        }

        if !self.settings.enable_checkpoints {
            return Ok(summary);
        }
        if filtered_out {
            info!(
                source = %reference,
                dropped = loaded - summary.kept,
                "Filters dropped records - checkpoint not advanced"
            );
            return Ok(summary);
        }

        match store.save_checkpoint(kind, reference, outcome.next_offset).await {
            Ok(()) => summary.checkpoint_saved = true,
            // Best-effort: the next run re-fetches from the old offset and
            // the upsert absorbs the overlap
            Err(e) => warn!(source = %reference, error = %e, "Failed to save checkpoint"),
        }

        Ok(summary)
    }

    async fn finish_run_log(&self, run_id: Uuid, reference: &str, result: &Result<RunSummary>) {
        let Some(store) = self.store else {
            return;
        };

        let (status, counts, error) = match result {
            Ok(summary) => (
                RunStatus::Completed,
                RunCounts {
                    total: summary.kept,
                    inserted: summary.stats.inserted,
                    updated: summary.stats.updated,
                },
                None,
            ),
            Err(EtlError::Persistence { inserted, updated, .. }) => (
                RunStatus::Failed,
                RunCounts {
                    total: inserted + updated,
                    inserted: *inserted,
                    updated: *updated,
                },
                result.as_ref().err().map(|e| e.to_string()),
            ),
            Err(e) => (RunStatus::Failed, RunCounts::default(), Some(e.to_string())),
        };

        if let Err(e) = store
            .log_run_finished(run_id, status, counts, error.as_deref())
            .await
        {
            // Run log is observability only
            warn!(source = %reference, error = %e, "Failed to finish run log entry");
        }
    }
}
