//! Sources configuration
//!
//! One JSON file lists the API and file sources plus the global settings.
//! It is loaded once in `main` and passed down by reference; nothing here is
//! global or read lazily from the environment.

use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// =============================================================================
// Source Configuration Types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub api_sources: Vec<ApiSource>,
    #[serde(default)]
    pub file_sources: Vec<FileSource>,
}

/// Global settings. Durations are milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Datastore search endpoint, e.g. `https://data.example.go.id/api/3/action/datastore_search`
    pub base_url: String,
    /// Records requested per page
    pub batch_size: usize,
    /// Attempts per page before the load fails
    pub max_retries: u32,
    /// Base backoff; attempt n waits `retry_delay * 2^(n-1)`
    pub retry_delay: u64,
    /// HTTP request timeout
    pub timeout: u64,
    /// Pause between successive page requests
    pub request_delay: u64,
    /// Records per upsert transaction
    pub upsert_chunk_size: usize,
    pub enable_checkpoints: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            batch_size: 100,
            max_retries: 3,
            retry_delay: 1000,
            timeout: 30_000,
            request_delay: 500,
            upsert_chunk_size: 500,
            enable_checkpoints: true,
        }
    }
}

impl Settings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay)
    }

    /// Reject settings that would make the loaders spin or never fetch
    pub fn validate(&self, has_api_sources: bool) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EtlError::config("settings.batch_size must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(EtlError::config("settings.max_retries must be at least 1"));
        }
        if self.upsert_chunk_size == 0 {
            return Err(EtlError::config("settings.upsert_chunk_size must be at least 1"));
        }
        if has_api_sources && self.base_url.trim().is_empty() {
            return Err(EtlError::config(
                "settings.base_url is required when api_sources are configured",
            ));
        }
        Ok(())
    }
}

/// Field mapping exactly as written in the config file.
///
/// Which fields are present decides the mapping mode; see
/// [`crate::transform::Mapping::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMapping {
    #[serde(default)]
    pub elemen_field: Option<String>,
    #[serde(default)]
    pub tahun_field: Option<String>,
    #[serde(default)]
    pub nilai_field: Option<String>,
    #[serde(default)]
    pub satuan_field: Option<String>,
    #[serde(default)]
    pub year_column_regex: Option<String>,
    #[serde(default)]
    pub unit_field: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSource {
    pub kategori: String,
    pub resource_id: String,
    pub mapping: RawMapping,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSource {
    pub kategori: String,
    pub file_path: PathBuf,
    pub mapping: RawMapping,
    #[serde(default)]
    pub csv_options: CsvOptions,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FileSource {
    /// File name used as the source reference (checkpoints, fingerprints)
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_path.to_string_lossy().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Single character; defaults to `,` (tab for `.tsv`)
    pub delimiter: Option<String>,
    /// When false, columns are keyed by zero-based position
    pub header: bool,
    /// WHATWG encoding label
    pub encoding: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            header: true,
            encoding: "utf-8".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Load sources configuration from JSON file
pub async fn load_sources_config(path: &Path) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        EtlError::config(format!("failed to read sources config {}: {}", path.display(), e))
    })?;
    parse_sources_config(&content)
}

pub fn parse_sources_config(content: &str) -> Result<SourcesConfig> {
    let config: SourcesConfig = serde_json::from_str(content)
        .map_err(|e| EtlError::config(format!("failed to parse sources config: {}", e)))?;
    config.settings.validate(!config.api_sources.is_empty())?;
    Ok(config)
}
