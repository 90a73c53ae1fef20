//! Expiration policy engine.
//!
//! Pure decisions about whether an entry's last successful build may still be
//! served as fresh. Nothing here reads a clock or touches storage; callers pass
//! the entry snapshot and the current time.

use crate::config::OrchestratorConfig;
use crate::entry::{CacheEntry, CacheStatus, ExpirationPolicy, UpdatePolicy, UsageSignals};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    NeverBuilt,
    Invalidated,
    MarkedExpired,
    TtlElapsed,
    DayRolledOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale(StaleReason),
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    offset: FixedOffset,
    dynamic_min: Duration,
    dynamic_max: Duration,
}

impl PolicyEngine {
    pub fn new(config: &OrchestratorConfig) -> Self {
        let a = Duration::minutes(i64::from(config.dynamic_min_ttl_minutes));
        let b = Duration::minutes(i64::from(config.dynamic_max_ttl_minutes));
        Self {
            offset: config.reference_offset(),
            dynamic_min: a.min(b),
            dynamic_max: a.max(b),
        }
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.evaluate(entry, now).is_fresh()
    }

    pub fn evaluate(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        let Some(last) = entry.last_successful_update else {
            return Freshness::Stale(StaleReason::NeverBuilt);
        };
        if entry.invalidated {
            return Freshness::Stale(StaleReason::Invalidated);
        }
        if entry.status == CacheStatus::Expired {
            return Freshness::Stale(StaleReason::MarkedExpired);
        }
        if entry.expiration_policy == ExpirationPolicy::Never {
            return Freshness::Fresh;
        }

        // Clock skew: a build "in the future" counts as just finished.
        let elapsed = (now - last).max(Duration::zero());

        match entry.update_policy {
            UpdatePolicy::Manual | UpdatePolicy::NewDataFlag => Freshness::Fresh,
            UpdatePolicy::OnceADay => {
                let built_on = last.with_timezone(&self.offset).date_naive();
                let today = now.with_timezone(&self.offset).date_naive();
                if today <= built_on {
                    Freshness::Fresh
                } else {
                    Freshness::Stale(StaleReason::DayRolledOver)
                }
            }
            UpdatePolicy::AllAppRestarts => match entry.expiration_policy {
                ExpirationPolicy::TtlMinutes(minutes) => {
                    within(elapsed, Duration::minutes(i64::from(minutes)))
                }
                ExpirationPolicy::Never => Freshness::Fresh,
            },
            UpdatePolicy::Dynamic => within(elapsed, self.dynamic_ttl(&entry.usage)),
        }
    }

    /// Effective TTL for the `dynamic` policy.
    ///
    /// Non-increasing in both source mutations and read frequency, clamped to
    /// the configured range.
    pub fn dynamic_ttl(&self, usage: &UsageSignals) -> Duration {
        let reads = usage.reads_per_hour.max(0.0);
        let churn = usage.source_mutations as f64 + reads.ln_1p() / 4.0;
        let max_secs = self.dynamic_max.num_seconds() as f64;
        let secs = (max_secs / (1.0 + churn)).round() as i64;
        Duration::seconds(secs).clamp(self.dynamic_min, self.dynamic_max)
    }
}

fn within(elapsed: Duration, ttl: Duration) -> Freshness {
    if elapsed < ttl {
        Freshness::Fresh
    } else {
        Freshness::Stale(StaleReason::TtlElapsed)
    }
}
