//! Statistics loader - public-sector statistics into one fact table
//!
//! Pulls tables from a paginated datastore API and from CSV/Excel files,
//! normalizes long- and wide-shaped records into canonical facts, and upserts
//! them into PostgreSQL keyed by a content fingerprint. Runs are resumable
//! through per-source checkpoints.
//!
//! CRITICAL: loading is idempotent. The same source data always yields the
//! same fingerprints, so re-fetching after a crash never duplicates rows.

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod file;
pub mod fingerprint;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod transform;

pub use error::{EtlError, Result};
pub use record::{FactRecord, LoadOutcome, SourceKind};
