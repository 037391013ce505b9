//! API source loader - paginated datastore search
//!
//! Responsibilities:
//! - Page through a remote resource (`resource_id`, `offset`, `limit`)
//! - Retry each page with exponential backoff
//! - Pause between pages to avoid degrading the source site
//! - Apply the long/wide transform per record, skipping records that fail

use crate::config::{ApiSource, Settings};
use crate::error::{EtlError, Result};
use crate::record::{LoadOutcome, SourceKind};
use crate::transform::{transform_value, Mapping, SourceContext};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "SatuDataLoader/1.0 (statistics ETL)";

/// Envelope returned by the datastore search endpoint
#[derive(Debug, Deserialize)]
struct DatastoreResponse {
    success: bool,
    #[serde(default)]
    result: Option<Page>,
    #[serde(default)]
    error: Option<Value>,
}

/// One page of remote records
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    request_delay: Duration,
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EtlError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            batch_size: settings.batch_size,
            max_retries: settings.max_retries.max(1),
            retry_delay: settings.retry_delay(),
            request_delay: settings.request_delay(),
        })
    }

    /// Wait after failed attempt `attempt` (1-based): `retry_delay * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Single request, no retry. Errors are rendered for the retry log.
    async fn fetch_page_once(&self, resource_id: &str, offset: i64) -> std::result::Result<Page, String> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("resource_id", resource_id.to_string()),
                ("offset", offset.to_string()),
                ("limit", self.batch_size.to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let body: DatastoreResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid response body: {}", e))?;

        if !body.success {
            let detail = body.error.map(|e| e.to_string()).unwrap_or_default();
            return Err(format!("API reported success=false {}", detail).trim_end().to_string());
        }

        body.result
            .ok_or_else(|| "response has no 'result' object".to_string())
    }

    /// Fetch one page, retrying with exponential backoff.
    ///
    /// A failed attempt waits [`Self::backoff_delay`] before the next one; the
    /// last failure is returned as `EtlError::Fetch` without a further wait.
    pub async fn fetch_page(&self, resource_id: &str, offset: i64) -> Result<Page> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            match self.fetch_page_once(resource_id, offset).await {
                Ok(page) => {
                    debug!(
                        resource_id,
                        offset,
                        records = page.records.len(),
                        total = ?page.total,
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Err(message) => {
                    if attempt < self.max_retries {
                        let backoff = self.backoff_delay(attempt);
                        warn!(
                            resource_id,
                            offset,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %message,
                            "Page fetch failed, retrying..."
                        );
                        sleep(backoff).await;
                    }
                    last_error = message;
                }
            }
        }

        Err(EtlError::Fetch {
            resource_id: resource_id.to_string(),
            offset,
            attempts: self.max_retries,
            message: last_error,
        })
    }

    /// Page through `source` starting at `resume_offset`.
    ///
    /// Stops on an empty page or once `offset >= total`. Any page that
    /// exhausts its retries fails the whole load; nothing is returned
    /// partially.
    pub async fn load(&self, source: &ApiSource, resume_offset: i64) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome {
            next_offset: resume_offset.max(0),
            ..Default::default()
        };

        let Some(mapping) = Mapping::resolve(&source.mapping)? else {
            outcome.warnings.push(format!(
                "resource {} has neither tahun_field/nilai_field nor year_column_regex; nothing to load",
                source.resource_id
            ));
            return Ok(outcome);
        };

        let ctx = SourceContext {
            category: &source.kategori,
            kind: SourceKind::Api,
            reference: &source.resource_id,
        };

        info!(
            resource_id = %source.resource_id,
            mode = mapping.mode(),
            offset = outcome.next_offset,
            "Loading API source"
        );

        let mut offset = outcome.next_offset;
        let mut pages = 0usize;

        loop {
            // Rate limit between pages, never before the first
            if pages > 0 && !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }

            let page = self.fetch_page(&source.resource_id, offset).await?;
            pages += 1;

            if page.records.is_empty() {
                debug!(resource_id = %source.resource_id, offset, "Empty page, done");
                break;
            }

            for (idx, raw) in page.records.iter().enumerate() {
                match transform_value(&mapping, raw, &ctx) {
                    Ok(records) => outcome.records.extend(records),
                    Err(e) => {
                        outcome.skipped += 1;
                        warn!(
                            resource_id = %source.resource_id,
                            offset = offset + idx as i64,
                            error = %e,
                            "Skipping record"
                        );
                    }
                }
            }

            offset += page.records.len() as i64;
            info!(
                resource_id = %source.resource_id,
                offset,
                total = ?page.total,
                records = outcome.records.len(),
                "Page processed"
            );

            if matches!(page.total, Some(total) if offset >= total) {
                break;
            }
        }

        outcome.next_offset = offset;
        Ok(outcome)
    }
}
