//! In-memory registry and payload store.
//!
//! Same semantics as the PostgreSQL adapters. Every mutation happens under a
//! single write lock, which is what makes `compare_and_transition` and
//! `try_claim_cooldown` atomic here.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use vigil_core::entry::{
    BuildTrigger, CacheDefinition, CacheEntry, CacheStatus, PolicyUpdate, UsageSignals,
};
use vigil_core::outcome::{BuildErrorRecord, BuildOutcome};
use vigil_core::payload::{AggregateRow, CachedPayload, FULL_UNIT_KEY, PayloadUnit};
use vigil_core::ports::{CacheRegistry, PayloadStore};
use vigil_core::{Error, Result};

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, CacheEntry>,
    errors: Vec<BuildErrorRecord>,
}

impl RegistryState {
    fn entry_mut(&mut self, name: &str) -> Result<&mut CacheEntry> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))
    }

    fn errors_since(&self, name: &str, since: DateTime<Utc>) -> u32 {
        self.errors
            .iter()
            .filter(|e| e.cache_name == name && e.occurred_at > since)
            .count() as u32
    }

    /// Append the audit row and fold `outcome` into the entry.
    fn apply(
        &mut self,
        name: &str,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<&CacheEntry> {
        if let Some(record) = outcome.audit_record(name, now) {
            self.errors.push(record);
        }
        let errors_24h = self.errors_since(name, now - Duration::hours(24));

        let entry = self.entry_mut(name)?;
        entry.apply_outcome(outcome, errors_24h, now);
        entry.version += 1;
        Ok(&*entry)
    }
}

fn touch(entry: &mut CacheEntry, now: DateTime<Utc>) {
    entry.updated_at = now;
    entry.version += 1;
}

/// In-memory CacheRegistry.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheRegistry for MemoryRegistry {
    async fn get(&self, name: &str) -> Result<Option<CacheEntry>> {
        Ok(self.state.read().await.entries.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.state.read().await.entries.values().cloned().collect())
    }

    async fn upsert_defaults(
        &self,
        definition: &CacheDefinition,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        definition.validate()?;
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .entry(definition.name.clone())
            .or_insert_with(|| CacheEntry::new(definition, now));
        Ok(entry.clone())
    }

    async fn compare_and_transition(
        &self,
        name: &str,
        expected: CacheStatus,
        new: CacheStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = new;
        touch(entry, now);
        Ok(true)
    }

    async fn claim_build(
        &self,
        name: &str,
        expected: CacheStatus,
        trigger: &BuildTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = CacheStatus::Building;
        entry.last_build_started_at = Some(now);
        entry.last_build_trigger = Some(trigger.clone());
        touch(entry, now);
        Ok(true)
    }

    async fn record_build_result(
        &self,
        name: &str,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let mut state = self.state.write().await;
        state.entry_mut(name)?;
        Ok(state.apply(name, outcome, now)?.clone())
    }

    async fn recover_orphan(
        &self,
        name: &str,
        version: i64,
        outcome: &BuildOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        if entry.status != CacheStatus::Building || entry.version != version {
            return Ok(None);
        }
        Ok(Some(state.apply(name, outcome, now)?.clone()))
    }

    async fn record_hit(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.entry_mut(name)?.cache_hits += 1;
        Ok(())
    }

    async fn record_miss(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.entry_mut(name)?.cache_misses += 1;
        Ok(())
    }

    async fn try_claim_cooldown(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        if entry.cooldown_until.is_some_and(|current| current > now) {
            return Ok(false);
        }
        entry.cooldown_until = Some(until);
        touch(entry, now);
        Ok(true)
    }

    async fn invalidate(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        entry.invalidated = true;
        touch(entry, now);
        Ok(())
    }

    async fn set_policy(
        &self,
        name: Option<&str>,
        update: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        match name {
            Some(name) => {
                let entry = state.entry_mut(name)?;
                update.apply(entry);
                touch(entry, now);
                Ok(1)
            }
            None => {
                let mut changed = 0;
                for entry in state.entries.values_mut() {
                    update.apply(entry);
                    touch(entry, now);
                    changed += 1;
                }
                Ok(changed)
            }
        }
    }

    async fn report_usage(
        &self,
        name: &str,
        usage: UsageSignals,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        entry.usage = usage;
        entry.updated_at = now;
        Ok(())
    }

    async fn reset(&self, name: &str, now: DateTime<Utc>) -> Result<CacheEntry> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        if entry.status == CacheStatus::Building {
            return Err(Error::AlreadyBuilding(name.to_string()));
        }
        entry.reset(now);
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn recent_errors(&self, name: &str, limit: u32) -> Result<Vec<BuildErrorRecord>> {
        let state = self.state.read().await;
        let mut errors: Vec<BuildErrorRecord> = state
            .errors
            .iter()
            .filter(|e| e.cache_name == name)
            .cloned()
            .collect();
        errors.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        errors.truncate(limit as usize);
        Ok(errors)
    }
}

/// In-memory PayloadStore.
#[derive(Clone, Default)]
pub struct MemoryPayloadStore {
    payloads: Arc<RwLock<HashMap<String, CachedPayload>>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn load(&self, name: &str) -> Result<Option<CachedPayload>> {
        Ok(self
            .payloads
            .read()
            .await
            .get(name)
            .filter(|p| !p.is_empty())
            .cloned())
    }

    async fn replace(&self, name: &str, rows: Vec<AggregateRow>, now: DateTime<Utc>) -> Result<()> {
        let mut payload = CachedPayload::new(name);
        payload.units.insert(
            FULL_UNIT_KEY.to_string(),
            PayloadUnit {
                rows,
                committed_at: now,
            },
        );
        self.payloads.write().await.insert(name.to_string(), payload);
        Ok(())
    }

    async fn commit_unit(
        &self,
        name: &str,
        unit_key: &str,
        rows: Vec<AggregateRow>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut payloads = self.payloads.write().await;
        payloads
            .entry(name.to_string())
            .or_insert_with(|| CachedPayload::new(name))
            .units
            .insert(
                unit_key.to_string(),
                PayloadUnit {
                    rows,
                    committed_at: now,
                },
            );
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<()> {
        self.payloads.write().await.remove(name);
        Ok(())
    }
}
