//! Upsert / checkpoint / run-log store (PostgreSQL)
//!
//! - Facts are keyed by `fingerprint`; a conflict updates the mutable columns
//! - Batches are split into chunks, one transaction per chunk. A failed chunk
//!   is rolled back and counted, later chunks still run
//! - Checkpoints and run-log writes are best-effort side channels

use crate::error::Result;
use crate::record::{FactRecord, RunStatus, SourceKind};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Bundled DDL, idempotent
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");

// `xmax = 0` holds only for a row version created by this INSERT, so it
// tells inserts from conflict updates exactly.
const UPSERT_FACT_SQL: &str = r#"
    INSERT INTO fact_records
        (category, element, year, value, unit, raw_payload, source_kind, source_reference, fingerprint, ingested_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
    ON CONFLICT (fingerprint) DO UPDATE SET
        value = EXCLUDED.value,
        unit = EXCLUDED.unit,
        raw_payload = EXCLUDED.raw_payload,
        source_kind = EXCLUDED.source_kind,
        source_reference = EXCLUDED.source_reference,
        updated_at = now()
    RETURNING (xmax = 0) AS inserted
"#;

/// Tally of one `upsert` call, summed across chunks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    /// Records in chunks that were rolled back
    pub failed_records: usize,
    pub failed_chunks: usize,
}

impl UpsertStats {
    pub fn add(&mut self, other: UpsertStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed_records += other.failed_records;
        self.failed_chunks += other.failed_chunks;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Checkpoint {
    pub source_kind: String,
    pub source_reference: String,
    pub last_offset: i64,
    pub last_processed_at: DateTime<Utc>,
}

/// Counts written when a run finishes
#[derive(Debug, Default, Clone, Copy)]
pub struct RunCounts {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    chunk_size: usize,
}

impl Store {
    pub fn new(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn connect(db_url: &str, chunk_size: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        Ok(Self::new(pool, chunk_size))
    }

    /// Create tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Facts
    // =========================================================================

    /// Insert-or-update `batch`, one transaction per chunk.
    ///
    /// Never fails as a whole: a chunk error is logged and reported through
    /// `failed_chunks` / `failed_records`.
    pub async fn upsert(&self, batch: &[FactRecord]) -> UpsertStats {
        let mut stats = UpsertStats::default();

        for (idx, chunk) in batch.chunks(self.chunk_size).enumerate() {
            match self.upsert_chunk(chunk).await {
                Ok(chunk_stats) => {
                    debug!(
                        chunk = idx,
                        inserted = chunk_stats.inserted,
                        updated = chunk_stats.updated,
                        "Chunk committed"
                    );
                    stats.add(chunk_stats);
                }
                Err(e) => {
                    error!(chunk = idx, records = chunk.len(), error = %e, "Chunk rolled back");
                    stats.add(UpsertStats {
                        failed_records: chunk.len(),
                        failed_chunks: 1,
                        ..Default::default()
                    });
                }
            }
        }

        stats
    }

    async fn upsert_chunk(&self, chunk: &[FactRecord]) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut tx = self.pool.begin().await?;

        for record in chunk {
            let inserted: bool = sqlx::query_scalar(UPSERT_FACT_SQL)
                .bind(&record.category)
                .bind(&record.element)
                .bind(record.year)
                .bind(record.value)
                .bind(record.unit.as_deref())
                .bind(&record.raw_payload)
                .bind(record.source_kind.as_str())
                .bind(&record.source_reference)
                .bind(&record.fingerprint)
                .fetch_one(&mut *tx)
                .await?;

            if inserted {
                stats.inserted += 1;
            } else {
                stats.updated += 1;
            }
        }

        // Dropping `tx` on an early return above rolls the chunk back
        tx.commit().await?;
        Ok(stats)
    }

    /// Number of stored facts for a source reference
    pub async fn count_facts(&self, kind: SourceKind, reference: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fact_records WHERE source_kind = $1 AND source_reference = $2",
        )
        .bind(kind.as_str())
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    pub async fn find_checkpoint(&self, kind: SourceKind, reference: &str) -> Result<Option<Checkpoint>> {
        let row: Option<Checkpoint> = sqlx::query_as(
            r#"
            SELECT source_kind, source_reference, last_offset, last_processed_at
            FROM etl_checkpoints
            WHERE source_kind = $1 AND source_reference = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Stored resume offset; 0 when absent or on any lookup failure
    pub async fn get_checkpoint(&self, kind: SourceKind, reference: &str) -> i64 {
        match self.find_checkpoint(kind, reference).await {
            Ok(Some(checkpoint)) => checkpoint.last_offset.max(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(source = %reference, error = %e, "Checkpoint lookup failed, starting from 0");
                0
            }
        }
    }

    pub async fn save_checkpoint(&self, kind: SourceKind, reference: &str, offset: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_checkpoints (source_kind, source_reference, last_offset, last_processed_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (source_kind, source_reference)
            DO UPDATE SET last_offset = EXCLUDED.last_offset, last_processed_at = now()
            "#,
        )
        .bind(kind.as_str())
        .bind(reference)
        .bind(offset.max(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_checkpoint(&self, kind: SourceKind, reference: &str) -> Result<()> {
        sqlx::query("DELETE FROM etl_checkpoints WHERE source_kind = $1 AND source_reference = $2")
            .bind(kind.as_str())
            .bind(reference)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Run log
    // =========================================================================

    /// Create a run log entry in `started` state
    pub async fn log_run_started(&self, kind: SourceKind, reference: &str, category: &str) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO etl_runs (run_id, source_kind, source_reference, category, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run_id)
        .bind(kind.as_str())
        .bind(reference)
        .bind(category)
        .bind(RunStatus::Started.as_str())
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    /// Move a run to `completed` or `failed`
    pub async fn log_run_finished(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE etl_runs
            SET status = $2, total_count = $3, new_count = $4, updated_count = $5,
                error = $6, completed_at = now()
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(counts.total as i64)
        .bind(counts.inserted as i64)
        .bind(counts.updated as i64)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
