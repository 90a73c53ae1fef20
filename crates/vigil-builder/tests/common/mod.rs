//! Shared fixtures: a scripted aggregation producer, scriptable stores over
//! the in-memory adapters, and a harness wiring them together.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{Duration, sleep};
use vigil_builder::Orchestrator;
use vigil_core::ports::{AggregationProducer, CacheRegistry, ChunkStream, PayloadStore};
use vigil_core::{
    AggregateRow, BuildErrorRecord, BuildOutcome, BuildTrigger, CacheDefinition, CacheEntry,
    CacheStatus, CachedPayload, EntityType, Error, ManualClock, OrchestratorConfig, PolicyUpdate,
    Result, UnitSpec, UsageSignals,
};
use vigil_db::{MemoryPayloadStore, MemoryRegistry};

/// Blocks the first chunk of one unit until released.
pub struct Gate {
    unit: String,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Producer with scripted behavior per unit.
pub struct MockProducer {
    calls: AtomicUsize,
    unit_calls: Mutex<HashMap<String, u32>>,
    failing_units: Mutex<HashSet<String>>,
    flaky_units: Mutex<HashMap<String, u32>>,
    fail_all: AtomicBool,
    hang: AtomicBool,
    panic: AtomicBool,
    delay: Duration,
    rows_per_unit: usize,
    gate: Option<Gate>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            unit_calls: Mutex::new(HashMap::new()),
            failing_units: Mutex::new(HashSet::new()),
            flaky_units: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            delay: Duration::ZERO,
            rows_per_unit: 4,
            gate: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_unit(self, key: &str) -> Self {
        self.failing_units
            .lock()
            .expect("lock")
            .insert(key.to_string());
        self
    }

    /// Fail the first `failures` attempts at `key`, then succeed.
    pub fn flaky_unit(self, key: &str, failures: u32) -> Self {
        self.flaky_units
            .lock()
            .expect("lock")
            .insert(key.to_string(), failures);
        self
    }

    pub fn gated_on(mut self, key: &str) -> (Self, Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.gate = Some(Gate {
            unit: key.to_string(),
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (self, reached, release)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hang.store(hanging, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panic.store(panicking, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &str) -> u32 {
        self.unit_calls
            .lock()
            .expect("lock")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn rows_per_unit(&self) -> u64 {
        self.rows_per_unit as u64
    }
}

#[async_trait]
impl AggregationProducer for MockProducer {
    async fn produce(
        &self,
        _cache_name: &str,
        _entity_type: EntityType,
        unit: UnitSpec,
    ) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = unit.key();
        let attempt = {
            let mut unit_calls = self.unit_calls.lock().expect("lock");
            let calls = unit_calls.entry(key.clone()).or_default();
            *calls += 1;
            *calls
        };

        if self.panic.load(Ordering::SeqCst) {
            panic!("aggregation engine crashed on {}", key);
        }
        let flaky = self
            .flaky_units
            .lock()
            .expect("lock")
            .get(&key)
            .is_some_and(|&failures| attempt <= failures);
        let failing = flaky
            || self.fail_all.load(Ordering::SeqCst)
            || self.failing_units.lock().expect("lock").contains(&key);
        if failing {
            let err = Error::ProducerFailure(format!("aggregation of {} failed", key));
            return Ok(Box::pin(stream::iter(vec![Err::<Vec<AggregateRow>, _>(err)])));
        }
        if self.hang.load(Ordering::SeqCst) {
            return Ok(Box::pin(stream::pending::<Result<Vec<AggregateRow>>>()));
        }

        let mut rows: Vec<AggregateRow> = (0..self.rows_per_unit)
            .map(|i| AggregateRow::new(format!("{}/{}", key, i + 1), i as u64 + 1))
            .collect();
        let second = rows.split_off(self.rows_per_unit / 2);

        let delay = self.delay;
        let gate = self
            .gate
            .as_ref()
            .filter(|g| g.unit == key)
            .map(|g| (Arc::clone(&g.reached), Arc::clone(&g.release)));
        let first = async move {
            if let Some((reached, release)) = gate {
                reached.notify_one();
                release.notified().await;
            }
            if !delay.is_zero() {
                sleep(delay).await;
            }
            Ok::<_, Error>(rows)
        };

        Ok(Box::pin(stream::once(first).chain(stream::iter(vec![Ok::<_, Error>(second)]))))
    }
}

/// Registry that delegates to `MemoryRegistry` unless told otherwise.
#[derive(Default)]
pub struct ScriptedRegistry {
    inner: MemoryRegistry,
    claim_pause_ms: AtomicU64,
    lose_claims: AtomicBool,
    expire_before_next_claim: AtomicBool,
}

impl ScriptedRegistry {
    /// Hold every won claim for `pause` before reporting it.
    pub fn pause_after_claim(&self, pause: Duration) {
        self.claim_pause_ms
            .store(pause.as_millis() as u64, Ordering::SeqCst);
    }

    /// Report every claim as lost without touching the entry.
    pub fn set_losing_claims(&self, losing: bool) {
        self.lose_claims.store(losing, Ordering::SeqCst);
    }

    /// Move the entry from `active` to `expired` just before the next claim,
    /// as a concurrent freshness check would.
    pub fn expire_before_next_claim(&self) {
        self.expire_before_next_claim.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheRegistry for ScriptedRegistry {
    async fn get(&self, name: &str) -> Result<Option<CacheEntry>> {
        self.inner.get(name).await
    }

    async fn list(&self) -> Result<Vec<CacheEntry>> {
        self.inner.list().await
    }

    async fn upsert_defaults(
        &self,
        definition: &CacheDefinition,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        self.inner.upsert_defaults(definition, now).await
    }

    async fn compare_and_transition(
        &self,
        name: &str,
        expected: CacheStatus,
        new: CacheStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .compare_and_transition(name, expected, new, now)
            .await
    }

    async fn claim_build(
        &self,
        name: &str,
        expected: CacheStatus,
        trigger: &BuildTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.lose_claims.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.expire_before_next_claim.swap(false, Ordering::SeqCst) {
            self.inner
                .compare_and_transition(name, CacheStatus::Active, CacheStatus::Expired, now)
                .await?;
        }
        let won = self.inner.claim_build(name, expected, trigger, now).await?;
        let pause = self.claim_pause_ms.load(Ordering::SeqCst);
        if won && pause > 0 {
            sleep(Duration::from_millis(pause)).await;
        }
        Ok(won)
    }

    async fn recover_orphan(
        &self,
        name: &str,
        version: i64,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        self.inner.recover_orphan(name, version, outcome, now).await
    }

    async fn record_build_result(
        &self,
        name: &str,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        self.inner.record_build_result(name, outcome, now).await
    }

    async fn record_hit(&self, name: &str) -> Result<()> {
        self.inner.record_hit(name).await
    }

    async fn record_miss(&self, name: &str) -> Result<()> {
        self.inner.record_miss(name).await
    }

    async fn try_claim_cooldown(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.try_claim_cooldown(name, now, until).await
    }

    async fn invalidate(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        self.inner.invalidate(name, now).await
    }

    async fn set_policy(
        &self,
        name: Option<&str>,
        update: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.set_policy(name, update, now).await
    }

    async fn report_usage(
        &self,
        name: &str,
        usage: UsageSignals,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.report_usage(name, usage, now).await
    }

    async fn reset(&self, name: &str, now: DateTime<Utc>) -> Result<CacheEntry> {
        self.inner.reset(name, now).await
    }

    async fn recent_errors(&self, name: &str, limit: u32) -> Result<Vec<BuildErrorRecord>> {
        self.inner.recent_errors(name, limit).await
    }
}

/// Payload store that delegates to `MemoryPayloadStore` and can refuse clears.
#[derive(Default)]
pub struct ScriptedPayloads {
    inner: MemoryPayloadStore,
    fail_clears: AtomicBool,
}

impl ScriptedPayloads {
    pub fn set_failing_clears(&self, failing: bool) {
        self.fail_clears.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PayloadStore for ScriptedPayloads {
    async fn load(&self, name: &str) -> Result<Option<CachedPayload>> {
        self.inner.load(name).await
    }

    async fn replace(&self, name: &str, rows: Vec<AggregateRow>, now: DateTime<Utc>) -> Result<()> {
        self.inner.replace(name, rows, now).await
    }

    async fn commit_unit(
        &self,
        name: &str,
        unit_key: &str,
        rows: Vec<AggregateRow>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.commit_unit(name, unit_key, rows, now).await
    }

    async fn clear(&self, name: &str) -> Result<()> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(Error::Database("payload store unavailable".to_string()));
        }
        self.inner.clear(name).await
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ScriptedRegistry>,
    pub payloads: Arc<ScriptedPayloads>,
    pub producer: Arc<MockProducer>,
    pub clock: Arc<ManualClock>,
    pub config: OrchestratorConfig,
}

/// Fast retries and frequent heartbeat checks.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        unit_retry_delay_ms: 1,
        heartbeat_check_interval_ms: 50,
        cold_start_timeout_secs: 5,
        ..Default::default()
    }
}

pub async fn harness(
    producer: MockProducer,
    config: OrchestratorConfig,
    definitions: &[CacheDefinition],
) -> Harness {
    let registry = Arc::new(ScriptedRegistry::default());
    let payloads = Arc::new(ScriptedPayloads::default());
    let producer = Arc::new(producer);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry) as _,
        Arc::clone(&payloads) as _,
        Arc::clone(&producer) as _,
        Arc::clone(&clock) as _,
        config.clone(),
    ));
    orchestrator
        .initialize_defaults(definitions, true)
        .await
        .expect("initialize defaults");

    Harness {
        orchestrator,
        registry,
        payloads,
        producer,
        clock,
        config,
    }
}

impl Harness {
    /// A second orchestrator over the same stores, standing in for another
    /// process sharing the registry.
    pub fn peer(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.registry) as _,
            Arc::clone(&self.payloads) as _,
            Arc::clone(&self.producer) as _,
            Arc::clone(&self.clock) as _,
            self.config.clone(),
        )
    }

    /// Wait for the in-flight build of `name` to be recorded.
    pub async fn settle(&self, name: &str) {
        let finished = self
            .orchestrator
            .runner()
            .wait(name, Duration::from_secs(30))
            .await
            .expect("wait");
        assert!(finished, "build for {} did not finish", name);
    }
}

pub fn api_cache(name: &str) -> CacheDefinition {
    CacheDefinition::new(name, EntityType::ApiCache)
}

pub fn heat_map_2025() -> CacheDefinition {
    CacheDefinition::new("dt-activity-2025", EntityType::HeatMapCache).with_target_year(2025)
}
