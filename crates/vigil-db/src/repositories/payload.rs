//! PostgreSQL implementation of PayloadStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use vigil_core::payload::{AggregateRow, CachedPayload, FULL_UNIT_KEY, PayloadUnit};
use vigil_core::ports::PayloadStore;
use vigil_core::{Error, Result};

/// PostgreSQL implementation of PayloadStore.
///
/// Each unit is one row; a unit is replaced by a single statement so readers
/// see either the previous rows or the new ones.
pub struct PgPayloadStore {
    pool: PgPool,
}

impl PgPayloadStore {
    /// Create a new PgPayloadStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayloadStore for PgPayloadStore {
    async fn load(&self, name: &str) -> Result<Option<CachedPayload>> {
        let rows = sqlx::query(
            "SELECT unit_key, unit_rows, committed_at FROM cache_payload_units \
             WHERE cache_name = $1 ORDER BY unit_key ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut payload = CachedPayload::new(name);
        for r in rows {
            let data: Vec<AggregateRow> = serde_json::from_value(r.get("unit_rows"))?;
            payload.units.insert(
                r.get("unit_key"),
                PayloadUnit {
                    rows: data,
                    committed_at: r.get("committed_at"),
                },
            );
        }
        Ok(Some(payload))
    }

    async fn replace(&self, name: &str, rows: Vec<AggregateRow>, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query("DELETE FROM cache_payload_units WHERE cache_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO cache_payload_units (cache_name, unit_key, unit_rows, record_count, committed_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(name)
        .bind(FULL_UNIT_KEY)
        .bind(serde_json::to_value(&rows)?)
        .bind(rows.len() as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn commit_unit(
        &self,
        name: &str,
        unit_key: &str,
        rows: Vec<AggregateRow>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO cache_payload_units (cache_name, unit_key, unit_rows, record_count, committed_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (cache_name, unit_key) DO UPDATE SET
                 unit_rows = EXCLUDED.unit_rows,
                 record_count = EXCLUDED.record_count,
                 committed_at = EXCLUDED.committed_at"#,
        )
        .bind(name)
        .bind(unit_key)
        .bind(serde_json::to_value(&rows)?)
        .bind(rows.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_payload_units WHERE cache_name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
