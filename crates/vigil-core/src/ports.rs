//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestrator and its
//! storage and producer adapters.

use crate::entry::{
    BuildTrigger, CacheDefinition, CacheEntry, CacheStatus, EntityType, PolicyUpdate,
    UsageSignals,
};
use crate::outcome::{BuildErrorRecord, BuildOutcome};
use crate::payload::{AggregateRow, CachedPayload, UnitSpec};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

/// Chunks of aggregated rows for one unit of work.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<AggregateRow>>> + Send>>;

/// Durable table of cache definitions and their live state.
#[async_trait]
pub trait CacheRegistry: Send + Sync {
    /// Get an entry by name.
    async fn get(&self, name: &str) -> Result<Option<CacheEntry>>;

    /// List all entries ordered by name.
    async fn list(&self) -> Result<Vec<CacheEntry>>;

    /// Create the entry if absent. Existing entries are returned untouched.
    async fn upsert_defaults(
        &self,
        definition: &CacheDefinition,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry>;

    /// Atomically move `name` from `expected` to `new`.
    ///
    /// Returns false when the stored status is not `expected`.
    async fn compare_and_transition(
        &self,
        name: &str,
        expected: CacheStatus,
        new: CacheStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically move `name` from `expected` to `building`, stamping the
    /// build start and trigger in the same write.
    ///
    /// This is the one synchronization point that keeps a cache to a single
    /// in-flight build. An entry never reads as `building` without its stamp.
    async fn claim_build(
        &self,
        name: &str,
        expected: CacheStatus,
        trigger: &BuildTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Fold a finished build into the entry and append its audit row.
    async fn record_build_result(
        &self,
        name: &str,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry>;

    /// Record `outcome` only if the entry is still `building` at `version`.
    ///
    /// Returns `None` when the entry moved on, e.g. a new build claimed it.
    async fn recover_orphan(
        &self,
        name: &str,
        version: i64,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>>;

    async fn record_hit(&self, name: &str) -> Result<()>;

    async fn record_miss(&self, name: &str) -> Result<()>;

    /// Install `until` as the cooldown if none is active at `now`.
    async fn try_claim_cooldown(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Raise the invalidation flag (new-data signal).
    async fn invalidate(&self, name: &str, now: DateTime<Utc>) -> Result<()>;

    /// Apply a policy change to one cache, or to all when `name` is `None`.
    /// Returns the number of entries changed.
    async fn set_policy(
        &self,
        name: Option<&str>,
        update: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn report_usage(&self, name: &str, usage: UsageSignals, now: DateTime<Utc>)
    -> Result<()>;

    /// Administrative reset of counters and state.
    async fn reset(&self, name: &str, now: DateTime<Utc>) -> Result<CacheEntry>;

    /// Newest audit rows first.
    async fn recent_errors(&self, name: &str, limit: u32) -> Result<Vec<BuildErrorRecord>>;
}

/// Storage for servable payloads with write-then-swap semantics.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Everything currently committed for `name`.
    async fn load(&self, name: &str) -> Result<Option<CachedPayload>>;

    /// Replace the whole payload in one commit.
    async fn replace(&self, name: &str, rows: Vec<AggregateRow>, now: DateTime<Utc>) -> Result<()>;

    /// Replace one unit in one commit; other units stay servable.
    async fn commit_unit(
        &self,
        name: &str,
        unit_key: &str,
        rows: Vec<AggregateRow>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear(&self, name: &str) -> Result<()>;
}

/// External aggregation engine. Opaque, chunked, and cancellable between chunks.
#[async_trait]
pub trait AggregationProducer: Send + Sync {
    async fn produce(
        &self,
        cache_name: &str,
        entity_type: EntityType,
        unit: UnitSpec,
    ) -> Result<ChunkStream>;
}
