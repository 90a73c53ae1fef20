//! PostgreSQL implementation of CacheRegistry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;
use vigil_core::entry::{
    BuildTrigger, CacheDefinition, CacheEntry, CacheStatus, PolicyUpdate, UsageSignals,
};
use vigil_core::outcome::{BuildErrorRecord, BuildOutcome, FailureKind};
use vigil_core::ports::CacheRegistry;
use vigil_core::{Error, Result};

const COLUMNS: &str = "name, entity_type, status, health, update_policy, expiration_policy, \
     auto_refresh, target_year, record_count, last_build_duration_ms, average_build_duration_ms, \
     last_successful_update, last_build_started_at, last_build_trigger, consecutive_failures, \
     error_count_24h, last_error_message, cache_hits, cache_misses, cooldown_until, invalidated, \
     degraded_units, reads_per_hour, source_mutations, created_at, updated_at, version";

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// PostgreSQL implementation of CacheRegistry.
pub struct PgCacheRegistry {
    pool: PgPool,
}

impl PgCacheRegistry {
    /// Create a new PgCacheRegistry.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(r: &PgRow) -> Result<CacheEntry> {
        let trigger: Option<serde_json::Value> = r.get("last_build_trigger");
        let last_build_trigger = trigger
            .map(serde_json::from_value::<BuildTrigger>)
            .transpose()?;
        let degraded_units: Vec<String> = serde_json::from_value(r.get("degraded_units"))?;

        Ok(CacheEntry {
            name: r.get("name"),
            entity_type: r.get::<String, _>("entity_type").parse()?,
            status: r.get::<String, _>("status").parse()?,
            health: r.get::<String, _>("health").parse()?,
            update_policy: r.get::<String, _>("update_policy").parse()?,
            expiration_policy: r.get::<String, _>("expiration_policy").parse()?,
            auto_refresh: r.get("auto_refresh"),
            target_year: r.get("target_year"),
            record_count: r.get::<i64, _>("record_count") as u64,
            last_build_duration_ms: r
                .get::<Option<i64>, _>("last_build_duration_ms")
                .map(|d| d as u64),
            average_build_duration_ms: r
                .get::<Option<i64>, _>("average_build_duration_ms")
                .map(|d| d as u64),
            last_successful_update: r.get("last_successful_update"),
            last_build_started_at: r.get("last_build_started_at"),
            last_build_trigger,
            consecutive_failures: r.get::<i32, _>("consecutive_failures") as u32,
            error_count_24h: r.get::<i32, _>("error_count_24h") as u32,
            last_error_message: r.get("last_error_message"),
            cache_hits: r.get::<i64, _>("cache_hits") as u64,
            cache_misses: r.get::<i64, _>("cache_misses") as u64,
            cooldown_until: r.get("cooldown_until"),
            invalidated: r.get("invalidated"),
            degraded_units,
            usage: UsageSignals {
                reads_per_hour: r.get("reads_per_hour"),
                source_mutations: r.get::<i64, _>("source_mutations") as u64,
            },
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
            version: r.get("version"),
        })
    }

    async fn lock_entry(conn: &mut PgConnection, name: &str) -> Result<CacheEntry> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cache_entries WHERE name = $1 FOR UPDATE",
            COLUMNS
        ))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        match row {
            Some(r) => Self::row_to_entry(&r),
            None => Err(Error::CacheNotFound(name.to_string())),
        }
    }

    /// Write every mutable column of a locked entry back.
    async fn write_entry(conn: &mut PgConnection, entry: &CacheEntry) -> Result<()> {
        let trigger = entry
            .last_build_trigger
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"UPDATE cache_entries SET
                 status = $2, health = $3, update_policy = $4, expiration_policy = $5,
                 auto_refresh = $6, record_count = $7, last_build_duration_ms = $8,
                 average_build_duration_ms = $9, last_successful_update = $10,
                 last_build_started_at = $11, last_build_trigger = $12,
                 consecutive_failures = $13, error_count_24h = $14, last_error_message = $15,
                 cache_hits = $16, cache_misses = $17, cooldown_until = $18, invalidated = $19,
                 degraded_units = $20, reads_per_hour = $21, source_mutations = $22,
                 updated_at = $23, version = version + 1
               WHERE name = $1"#,
        )
        .bind(&entry.name)
        .bind(entry.status.as_str())
        .bind(entry.health.as_str())
        .bind(entry.update_policy.as_str())
        .bind(entry.expiration_policy.to_string())
        .bind(entry.auto_refresh)
        .bind(entry.record_count as i64)
        .bind(entry.last_build_duration_ms.map(|d| d as i64))
        .bind(entry.average_build_duration_ms.map(|d| d as i64))
        .bind(entry.last_successful_update)
        .bind(entry.last_build_started_at)
        .bind(trigger)
        .bind(entry.consecutive_failures as i32)
        .bind(entry.error_count_24h as i32)
        .bind(&entry.last_error_message)
        .bind(entry.cache_hits as i64)
        .bind(entry.cache_misses as i64)
        .bind(entry.cooldown_until)
        .bind(entry.invalidated)
        .bind(serde_json::to_value(&entry.degraded_units)?)
        .bind(entry.usage.reads_per_hour)
        .bind(entry.usage.source_mutations as i64)
        .bind(entry.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Append the audit row and fold `outcome` into a locked entry.
    async fn apply_outcome(
        conn: &mut PgConnection,
        mut entry: CacheEntry,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        if let Some(record) = outcome.audit_record(&entry.name, now) {
            sqlx::query(
                "INSERT INTO cache_build_errors (id, cache_name, kind, message, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(record.id)
            .bind(&record.cache_name)
            .bind(record.kind.as_str())
            .bind(&record.message)
            .bind(record.occurred_at)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        }

        let errors_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cache_build_errors WHERE cache_name = $1 AND occurred_at > $2",
        )
        .bind(&entry.name)
        .bind(now - Duration::hours(24))
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;

        entry.apply_outcome(outcome, errors_24h as u32, now);
        Self::write_entry(&mut *conn, &entry).await?;
        entry.version += 1;
        Ok(entry)
    }

    /// Turn "no row changed" into `CacheNotFound` when the row is missing.
    async fn ensure_exists(&self, name: &str) -> Result<()> {
        let found = sqlx::query("SELECT 1 FROM cache_entries WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match found {
            Some(_) => Ok(()),
            None => Err(Error::CacheNotFound(name.to_string())),
        }
    }

    async fn bump_counter(&self, name: &str, column: &str) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE cache_entries SET {col} = {col} + 1 WHERE name = $1",
            col = column
        ))
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::CacheNotFound(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheRegistry for PgCacheRegistry {
    async fn get(&self, name: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cache_entries WHERE name = $1",
            COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(r) => Ok(Some(Self::row_to_entry(&r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cache_entries ORDER BY name ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn upsert_defaults(
        &self,
        definition: &CacheDefinition,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        definition.validate()?;
        let fresh = CacheEntry::new(definition, now);

        sqlx::query(
            r#"INSERT INTO cache_entries (name, entity_type, status, health, update_policy,
                   expiration_policy, auto_refresh, target_year, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
               ON CONFLICT (name) DO NOTHING"#,
        )
        .bind(&fresh.name)
        .bind(fresh.entity_type.as_str())
        .bind(fresh.status.as_str())
        .bind(fresh.health.as_str())
        .bind(fresh.update_policy.as_str())
        .bind(fresh.expiration_policy.to_string())
        .bind(fresh.auto_refresh)
        .bind(fresh.target_year)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get(&definition.name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(definition.name.clone()))
    }

    async fn compare_and_transition(
        &self,
        name: &str,
        expected: CacheStatus,
        new: CacheStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cache_entries SET status = $3, updated_at = $4, version = version + 1 \
             WHERE name = $1 AND status = $2",
        )
        .bind(name)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            debug!(cache = %name, from = %expected, to = %new, "Status transition");
            return Ok(true);
        }
        self.ensure_exists(name).await?;
        Ok(false)
    }

    async fn claim_build(
        &self,
        name: &str,
        expected: CacheStatus,
        trigger: &BuildTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cache_entries SET status = $3, last_build_started_at = $4, \
             last_build_trigger = $5, updated_at = $4, version = version + 1 \
             WHERE name = $1 AND status = $2",
        )
        .bind(name)
        .bind(expected.as_str())
        .bind(CacheStatus::Building.as_str())
        .bind(now)
        .bind(serde_json::to_value(trigger)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            debug!(cache = %name, from = %expected, trigger = %trigger, "Build claimed");
            return Ok(true);
        }
        self.ensure_exists(name).await?;
        Ok(false)
    }

    async fn record_build_result(
        &self,
        name: &str,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let entry = Self::lock_entry(&mut *tx, name).await?;
        let entry = Self::apply_outcome(&mut *tx, entry, outcome, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(entry)
    }

    async fn recover_orphan(
        &self,
        name: &str,
        version: i64,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let entry = Self::lock_entry(&mut *tx, name).await?;
        if entry.status != CacheStatus::Building || entry.version != version {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }
        let entry = Self::apply_outcome(&mut *tx, entry, outcome, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(Some(entry))
    }

    async fn record_hit(&self, name: &str) -> Result<()> {
        self.bump_counter(name, "cache_hits").await
    }

    async fn record_miss(&self, name: &str) -> Result<()> {
        self.bump_counter(name, "cache_misses").await
    }

    async fn try_claim_cooldown(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cache_entries SET cooldown_until = $3, updated_at = $2, version = version + 1 \
             WHERE name = $1 AND (cooldown_until IS NULL OR cooldown_until <= $2)",
        )
        .bind(name)
        .bind(now)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_exists(name).await?;
        Ok(false)
    }

    async fn invalidate(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cache_entries SET invalidated = TRUE, updated_at = $2, version = version + 1 \
             WHERE name = $1",
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::CacheNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn set_policy(
        &self,
        name: Option<&str>,
        update: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE cache_entries SET
                 update_policy = COALESCE($2, update_policy),
                 expiration_policy = COALESCE($3, expiration_policy),
                 auto_refresh = COALESCE($4, auto_refresh),
                 updated_at = $5, version = version + 1
               WHERE ($1::TEXT IS NULL OR name = $1)"#,
        )
        .bind(name)
        .bind(update.update_policy.map(|p| p.as_str()))
        .bind(update.expiration_policy.map(|p| p.to_string()))
        .bind(update.auto_refresh)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(name) = name
            && result.rows_affected() == 0
        {
            return Err(Error::CacheNotFound(name.to_string()));
        }
        Ok(result.rows_affected())
    }

    async fn report_usage(
        &self,
        name: &str,
        usage: UsageSignals,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cache_entries SET reads_per_hour = $2, source_mutations = $3, updated_at = $4 \
             WHERE name = $1",
        )
        .bind(name)
        .bind(usage.reads_per_hour)
        .bind(usage.source_mutations as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::CacheNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn reset(&self, name: &str, now: DateTime<Utc>) -> Result<CacheEntry> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut entry = Self::lock_entry(&mut *tx, name).await?;
        if entry.status == CacheStatus::Building {
            return Err(Error::AlreadyBuilding(name.to_string()));
        }

        entry.reset(now);
        Self::write_entry(&mut *tx, &entry).await?;
        tx.commit().await.map_err(db_err)?;

        entry.version += 1;
        Ok(entry)
    }

    async fn recent_errors(&self, name: &str, limit: u32) -> Result<Vec<BuildErrorRecord>> {
        let rows = sqlx::query(
            "SELECT id, cache_name, kind, message, occurred_at FROM cache_build_errors \
             WHERE cache_name = $1 ORDER BY occurred_at DESC LIMIT $2",
        )
        .bind(name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|r| BuildErrorRecord {
                id: r.get("id"),
                cache_name: r.get("cache_name"),
                kind: FailureKind::parse(&r.get::<String, _>("kind")),
                message: r.get("message"),
                occurred_at: r.get("occurred_at"),
            })
            .collect())
    }
}
