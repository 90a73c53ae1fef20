//! Cache entry registry types.

use crate::outcome::BuildOutcome;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Weight of the newest build when folding it into `average_build_duration_ms`.
const DURATION_EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    PageCache,
    ApiCache,
    HeatMapCache,
    SystemCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Inactive,
    Building,
    Active,
    Error,
    Expired,
}

impl CacheStatus {
    /// States from which a refresh may move the entry to `Building`.
    pub fn can_start_build(&self) -> bool {
        matches!(
            self,
            CacheStatus::Inactive | CacheStatus::Expired | CacheStatus::Error | CacheStatus::Active
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    Manual,
    OnceADay,
    AllAppRestarts,
    NewDataFlag,
    Dynamic,
}

impl UpdatePolicy {
    /// Policies whose staleness is detected by the orchestrator itself and
    /// may therefore be refreshed by the background scheduler.
    pub fn is_policy_driven(&self) -> bool {
        !matches!(self, UpdatePolicy::Manual)
    }
}

macro_rules! snake_case_str {
    ($ty:ident { $($variant:ident => $s:expr),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(Error::InvalidDefinition(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

snake_case_str!(EntityType {
    PageCache => "page_cache",
    ApiCache => "api_cache",
    HeatMapCache => "heat_map_cache",
    SystemCache => "system_cache",
});

snake_case_str!(CacheStatus {
    Inactive => "inactive",
    Building => "building",
    Active => "active",
    Error => "error",
    Expired => "expired",
});

snake_case_str!(Health {
    Healthy => "healthy",
    Warning => "warning",
    Critical => "critical",
    Unknown => "unknown",
});

snake_case_str!(UpdatePolicy {
    Manual => "manual",
    OnceADay => "once_a_day",
    AllAppRestarts => "all_app_restarts",
    NewDataFlag => "new_data_flag",
    Dynamic => "dynamic",
});

/// Either a fixed time-to-live or `never`.
///
/// Serialized as the string `"never"` or as a bare number of minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirationPolicy {
    Never,
    TtlMinutes(u32),
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationPolicy::Never => f.write_str("never"),
            ExpirationPolicy::TtlMinutes(m) => write!(f, "{}", m),
        }
    }
}

impl FromStr for ExpirationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("never") {
            return Ok(ExpirationPolicy::Never);
        }
        match s.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(Error::InvalidDefinition(format!(
                "expiration policy must be 'never' or a positive number of minutes, got {}",
                s
            ))),
            Ok(minutes) => Ok(ExpirationPolicy::TtlMinutes(minutes)),
        }
    }
}

impl Serialize for ExpirationPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ExpirationPolicy::Never => serializer.serialize_str("never"),
            ExpirationPolicy::TtlMinutes(m) => serializer.serialize_u32(*m),
        }
    }
}

impl<'de> Deserialize<'de> for ExpirationPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Minutes(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Minutes(0) => Err(serde::de::Error::custom("ttl must be positive")),
            Raw::Minutes(m) => Ok(ExpirationPolicy::TtlMinutes(m)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// What caused a build to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildTrigger {
    ColdStart,
    Policy,
    Manual {
        #[serde(rename = "requestedBy")]
        requested_by: String,
    },
    Scheduler,
    NewData,
}

impl fmt::Display for BuildTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTrigger::ColdStart => f.write_str("cold_start"),
            BuildTrigger::Policy => f.write_str("policy"),
            BuildTrigger::Manual { requested_by } => write!(f, "manual:{}", requested_by),
            BuildTrigger::Scheduler => f.write_str("scheduler"),
            BuildTrigger::NewData => f.write_str("new_data"),
        }
    }
}

/// Externally reported activity used by the `dynamic` update policy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSignals {
    /// Dashboard reads per hour over the recent window.
    #[serde(default)]
    pub reads_per_hour: f64,
    /// Source-data mutations seen during the last average build interval.
    #[serde(default)]
    pub source_mutations: u64,
}

/// Registration input for a cache. Used by initialize-defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDefinition {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default = "default_update_policy")]
    pub update_policy: UpdatePolicy,
    #[serde(default = "default_expiration_policy")]
    pub expiration_policy: ExpirationPolicy,
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
    /// Calendar year built by a heat-map cache.
    #[serde(default)]
    pub target_year: Option<i32>,
}

fn default_update_policy() -> UpdatePolicy {
    UpdatePolicy::AllAppRestarts
}

fn default_expiration_policy() -> ExpirationPolicy {
    ExpirationPolicy::TtlMinutes(15)
}

fn default_auto_refresh() -> bool {
    true
}

impl CacheDefinition {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            update_policy: default_update_policy(),
            expiration_policy: default_expiration_policy(),
            auto_refresh: default_auto_refresh(),
            target_year: None,
        }
    }

    pub fn with_policies(mut self, update: UpdatePolicy, expiration: ExpirationPolicy) -> Self {
        self.update_policy = update;
        self.expiration_policy = expiration;
        self
    }

    pub fn with_target_year(mut self, year: i32) -> Self {
        self.target_year = Some(year);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidDefinition("cache name is empty".to_string()));
        }
        if self.name.len() > 128 {
            return Err(Error::InvalidDefinition(format!(
                "cache name too long: {}",
                self.name
            )));
        }
        if let Some(year) = self.target_year
            && !(1970..=9999).contains(&year)
        {
            return Err(Error::InvalidDefinition(format!(
                "target year out of range: {}",
                year
            )));
        }
        Ok(())
    }
}

/// Partial policy change applied by set-policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    #[serde(default)]
    pub update_policy: Option<UpdatePolicy>,
    #[serde(default)]
    pub expiration_policy: Option<ExpirationPolicy>,
    #[serde(default)]
    pub auto_refresh: Option<bool>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        self.update_policy.is_none() && self.expiration_policy.is_none() && self.auto_refresh.is_none()
    }

    pub fn apply(&self, entry: &mut CacheEntry) {
        if let Some(update) = self.update_policy {
            entry.update_policy = update;
        }
        if let Some(expiration) = self.expiration_policy {
            entry.expiration_policy = expiration;
        }
        if let Some(auto) = self.auto_refresh {
            entry.auto_refresh = auto;
        }
    }
}

/// One named cache and its live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub name: String,
    pub entity_type: EntityType,
    pub status: CacheStatus,
    pub health: Health,
    pub update_policy: UpdatePolicy,
    pub expiration_policy: ExpirationPolicy,
    pub auto_refresh: bool,
    pub target_year: Option<i32>,
    pub record_count: u64,
    pub last_build_duration_ms: Option<u64>,
    pub average_build_duration_ms: Option<u64>,
    pub last_successful_update: Option<DateTime<Utc>>,
    pub last_build_started_at: Option<DateTime<Utc>>,
    pub last_build_trigger: Option<BuildTrigger>,
    pub consecutive_failures: u32,
    #[serde(rename = "errorCount24h")]
    pub error_count_24h: u32,
    pub last_error_message: Option<String>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Raised by an explicit invalidation (new-data signal); cleared by the next build.
    pub invalidated: bool,
    /// Units missing from the served payload after a degraded or partial build.
    pub degraded_units: Vec<String>,
    pub usage: UsageSignals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every write.
    pub version: i64,
}

impl CacheEntry {
    pub fn new(definition: &CacheDefinition, now: DateTime<Utc>) -> Self {
        Self {
            name: definition.name.clone(),
            entity_type: definition.entity_type,
            status: CacheStatus::Inactive,
            health: Health::Unknown,
            update_policy: definition.update_policy,
            expiration_policy: definition.expiration_policy,
            auto_refresh: definition.auto_refresh,
            target_year: definition.target_year,
            record_count: 0,
            last_build_duration_ms: None,
            average_build_duration_ms: None,
            last_successful_update: None,
            last_build_started_at: None,
            last_build_trigger: None,
            consecutive_failures: 0,
            error_count_24h: 0,
            last_error_message: None,
            cache_hits: 0,
            cache_misses: 0,
            cooldown_until: None,
            invalidated: false,
            degraded_units: vec![],
            usage: UsageSignals::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// hits / (hits + misses), or 0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Whether a build has ever succeeded, i.e. a payload may be servable.
    pub fn has_succeeded(&self) -> bool {
        self.last_successful_update.is_some()
    }

    pub fn derive_health(&self) -> Health {
        if self.consecutive_failures >= 3 || self.error_count_24h >= 5 {
            Health::Critical
        } else if self.consecutive_failures >= 1 {
            Health::Warning
        } else if self.status == CacheStatus::Inactive && !self.has_succeeded() {
            Health::Unknown
        } else {
            Health::Healthy
        }
    }

    /// Fold a finished build into the permanent counters.
    ///
    /// `errors_24h` is the audit-log count after this outcome was appended.
    pub fn apply_outcome(&mut self, outcome: &BuildOutcome, errors_24h: u32, now: DateTime<Utc>) {
        match outcome {
            BuildOutcome::Success {
                duration_ms,
                record_count,
                degraded_units,
            } => {
                self.status = CacheStatus::Active;
                self.consecutive_failures = 0;
                self.record_count = *record_count;
                self.last_successful_update = Some(now);
                self.invalidated = false;
                self.degraded_units = degraded_units.clone();
                self.fold_duration(*duration_ms);
            }
            BuildOutcome::Failure {
                duration_ms,
                message,
                ..
            } => {
                self.status = CacheStatus::Error;
                self.consecutive_failures += 1;
                self.last_error_message = Some(message.clone());
                self.last_build_duration_ms = Some(*duration_ms);
            }
            BuildOutcome::Cancelled {
                restore_status,
                partial,
                ..
            } => match partial {
                Some(partial) => {
                    self.status = CacheStatus::Active;
                    self.record_count = partial.record_count;
                    self.last_successful_update = Some(now);
                    self.invalidated = false;
                    self.degraded_units = partial.missing_units.clone();
                    self.fold_duration(partial.projected_duration_ms);
                }
                None => self.status = *restore_status,
            },
        }
        self.error_count_24h = errors_24h;
        self.health = self.derive_health();
        self.updated_at = now;
    }

    /// Administrative reset: counters cleared, back to `inactive`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.status = CacheStatus::Inactive;
        self.record_count = 0;
        self.last_build_duration_ms = None;
        self.average_build_duration_ms = None;
        self.last_successful_update = None;
        self.last_build_started_at = None;
        self.last_build_trigger = None;
        self.consecutive_failures = 0;
        self.error_count_24h = 0;
        self.last_error_message = None;
        self.cache_hits = 0;
        self.cache_misses = 0;
        self.cooldown_until = None;
        self.invalidated = false;
        self.degraded_units.clear();
        self.usage = UsageSignals::default();
        self.health = Health::Unknown;
        self.updated_at = now;
    }

    fn fold_duration(&mut self, duration_ms: u64) {
        self.last_build_duration_ms = Some(duration_ms);
        self.average_build_duration_ms = Some(match self.average_build_duration_ms {
            None => duration_ms,
            Some(avg) => {
                (DURATION_EMA_ALPHA * duration_ms as f64 + (1.0 - DURATION_EMA_ALPHA) * avg as f64)
                    .round() as u64
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, PartialData};

    fn entry() -> CacheEntry {
        CacheEntry::new(
            &CacheDefinition::new("dt-activity-2025", EntityType::HeatMapCache),
            Utc::now(),
        )
    }

    fn failure() -> BuildOutcome {
        BuildOutcome::Failure {
            duration_ms: 10,
            kind: FailureKind::ProducerFailure,
            message: "connection reset".to_string(),
        }
    }

    fn success() -> BuildOutcome {
        BuildOutcome::Success {
            duration_ms: 100,
            record_count: 42,
            degraded_units: vec![],
        }
    }

    #[test]
    fn test_new_entry_is_inactive_and_unknown() {
        let e = entry();
        assert_eq!(e.status, CacheStatus::Inactive);
        assert_eq!(e.derive_health(), Health::Unknown);
        assert_eq!(e.hit_rate(), 0.0);
    }

    #[test]
    fn test_failures_escalate_health_and_success_resets() {
        let mut e = entry();
        let now = Utc::now();

        e.apply_outcome(&failure(), 1, now);
        assert_eq!(e.consecutive_failures, 1);
        assert_eq!(e.health, Health::Warning);
        assert_eq!(e.status, CacheStatus::Error);

        e.apply_outcome(&failure(), 2, now);
        assert_eq!(e.health, Health::Warning);

        e.apply_outcome(&failure(), 3, now);
        assert_eq!(e.consecutive_failures, 3);
        assert_eq!(e.health, Health::Critical);

        e.apply_outcome(&success(), 3, now);
        assert_eq!(e.consecutive_failures, 0);
        assert_eq!(e.health, Health::Healthy);
        assert_eq!(e.status, CacheStatus::Active);
        assert_eq!(e.record_count, 42);
        assert_eq!(e.last_error_message.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_error_count_alone_makes_critical() {
        let mut e = entry();
        e.apply_outcome(&success(), 5, Utc::now());
        assert_eq!(e.consecutive_failures, 0);
        assert_eq!(e.health, Health::Critical);
    }

    #[test]
    fn test_cancel_without_data_restores_status() {
        let mut e = entry();
        e.status = CacheStatus::Building;
        let outcome = BuildOutcome::Cancelled {
            duration_ms: 5,
            restore_status: CacheStatus::Expired,
            partial: None,
        };
        e.apply_outcome(&outcome, 0, Utc::now());
        assert_eq!(e.status, CacheStatus::Expired);
        assert!(!e.has_succeeded());
    }

    #[test]
    fn test_cancel_with_partial_data_is_active() {
        let mut e = entry();
        let outcome = BuildOutcome::Cancelled {
            duration_ms: 5,
            restore_status: CacheStatus::Inactive,
            partial: Some(PartialData {
                record_count: 150,
                missing_units: vec!["2025-06".to_string()],
                projected_duration_ms: 1200,
            }),
        };
        e.apply_outcome(&outcome, 0, Utc::now());
        assert_eq!(e.status, CacheStatus::Active);
        assert_eq!(e.record_count, 150);
        assert_eq!(e.degraded_units, vec!["2025-06".to_string()]);
    }

    #[test]
    fn test_average_duration_is_smoothed() {
        let mut e = entry();
        let now = Utc::now();
        e.apply_outcome(&success(), 0, now);
        assert_eq!(e.average_build_duration_ms, Some(100));
        e.apply_outcome(
            &BuildOutcome::Success {
                duration_ms: 200,
                record_count: 1,
                degraded_units: vec![],
            },
            0,
            now,
        );
        assert_eq!(e.average_build_duration_ms, Some(130));
        assert_eq!(e.last_build_duration_ms, Some(200));
    }

    #[test]
    fn test_expiration_policy_serde() {
        let never: ExpirationPolicy = serde_json::from_str("\"never\"").unwrap();
        assert_eq!(never, ExpirationPolicy::Never);
        let ttl: ExpirationPolicy = serde_json::from_str("15").unwrap();
        assert_eq!(ttl, ExpirationPolicy::TtlMinutes(15));
        assert!(serde_json::from_str::<ExpirationPolicy>("0").is_err());
        assert_eq!(serde_json::to_string(&ttl).unwrap(), "15");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("building".parse::<CacheStatus>().unwrap(), CacheStatus::Building);
        assert!("wedged".parse::<CacheStatus>().is_err());
        assert_eq!(UpdatePolicy::OnceADay.as_str(), "once_a_day");
    }

    #[test]
    fn test_definition_validation() {
        assert!(CacheDefinition::new("", EntityType::ApiCache).validate().is_err());
        assert!(
            CacheDefinition::new("hm", EntityType::HeatMapCache)
                .with_target_year(12)
                .validate()
                .is_err()
        );
        assert!(CacheDefinition::new("ok", EntityType::ApiCache).validate().is_ok());
    }
}
