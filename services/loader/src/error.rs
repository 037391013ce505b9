//! Error types for the loader
//!
//! Variants follow how far a failure is allowed to travel:
//! - `Config`: fatal to one source, other sources keep running
//! - `Fetch`: remote page still failing after every retry
//! - `Transform`: a single record or row, skipped by the loaders
//! - `Database`: a store operation (chunk, checkpoint, run log)

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed for resource '{resource_id}' at offset {offset} after {attempts} attempt(s): {message}")]
    Fetch {
        resource_id: String,
        offset: i64,
        attempts: u32,
        message: String,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Some upsert chunks rolled back; the counts cover the chunks that committed
    #[error("Persistence failed: {failed_chunks} chunk(s) with {failed_records} record(s) rolled back ({inserted} inserted, {updated} updated before failure)")]
    Persistence {
        failed_chunks: usize,
        failed_records: usize,
        inserted: usize,
        updated: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtlError {
    pub fn config(msg: impl Into<String>) -> Self {
        EtlError::Config(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        EtlError::Transform(msg.into())
    }
}
