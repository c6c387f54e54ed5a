use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::ingest::StoredSample;
use crate::sample::Sample;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::Row;
use std::sync::Arc;
use tracing::{info, warn};

/// Append-only log of ingested samples, keyed by ingestion timestamp.
#[async_trait]
pub trait SampleLog: Send + Sync {
    /// Store one sample. A timestamp that is already present is a conflict.
    async fn append(&self, sample: &StoredSample) -> Result<()>;

    /// Every stored sample. Callers must not rely on the order.
    async fn get_all(&self) -> Result<Vec<StoredSample>>;

    /// Most recent sample that carries a gas timestamp.
    async fn latest_with_gas(&self) -> Result<Option<StoredSample>>;

    /// Delete samples older than `cutoff_ms`, returning how many went.
    async fn prune_before(&self, cutoff_ms: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct SqliteSampleLog {
    pool: DbPool,
}

impl SqliteSampleLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<StoredSample> {
        let timestamp: i64 = row.try_get("timestamp")?;
        let gas_delta: Option<f64> = row.try_get("gas_delta")?;
        let payload: String = row.try_get("payload")?;
        let sample: Sample = serde_json::from_str(&payload)?;
        Ok(StoredSample {
            timestamp,
            sample,
            gas_delta,
        })
    }
}

#[async_trait]
impl SampleLog for SqliteSampleLog {
    async fn append(&self, sample: &StoredSample) -> Result<()> {
        let payload = serde_json::to_string(&sample.sample)?;
        sqlx::query("INSERT INTO energy_data (timestamp, gas_delta, payload) VALUES (?, ?, ?)")
            .bind(sample.timestamp)
            .bind(sample.gas_delta)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => AppError::Conflict(format!(
                    "a sample with timestamp {} is already stored",
                    sample.timestamp
                )),
                _ => AppError::Db(e),
            })?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredSample>> {
        let rows = sqlx::query("SELECT timestamp, gas_delta, payload FROM energy_data")
            .fetch_all(&self.pool)
            .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::decode(row) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(error = %e, "skipping unreadable stored sample"),
            }
        }
        Ok(samples)
    }

    async fn latest_with_gas(&self) -> Result<Option<StoredSample>> {
        let row = sqlx::query(
            r#"
            SELECT timestamp, gas_delta, payload
            FROM energy_data
            WHERE json_extract(payload, '$.gas_timestamp') IS NOT NULL
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn prune_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM energy_data WHERE timestamp < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Delete samples older than `retention_days` once an hour, forever.
pub async fn run_retention(log: Arc<dyn SampleLog>, retention_days: u32) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
    loop {
        interval.tick().await;
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        match log.prune_before(cutoff.timestamp_millis()).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, retention_days, "pruned old samples"),
            Err(e) => warn!(error = %e, "sample retention pass failed"),
        }
    }
}
