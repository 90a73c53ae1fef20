//! Build results and the failure audit log.

use crate::entry::{BuildTrigger, CacheStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProducerFailure,
    BuildTimeout,
    PartialBuildFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ProducerFailure => "producer_failure",
            FailureKind::BuildTimeout => "build_timeout",
            FailureKind::PartialBuildFailure => "partial_build_failure",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "build_timeout" => FailureKind::BuildTimeout,
            "partial_build_failure" => FailureKind::PartialBuildFailure,
            _ => FailureKind::ProducerFailure,
        }
    }
}

/// Data a cancelled incremental build left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialData {
    pub record_count: u64,
    pub missing_units: Vec<String>,
    pub projected_duration_ms: u64,
}

/// How a build ended, as recorded against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Payload committed. A non-empty `degraded_units` marks a degraded success.
    Success {
        duration_ms: u64,
        record_count: u64,
        degraded_units: Vec<String>,
    },
    Failure {
        duration_ms: u64,
        kind: FailureKind,
        message: String,
    },
    /// Cooperative cancellation. `partial` is set when committed units remain servable.
    Cancelled {
        duration_ms: u64,
        restore_status: CacheStatus,
        partial: Option<PartialData>,
    },
}

impl BuildOutcome {
    pub fn duration_ms(&self) -> u64 {
        match self {
            BuildOutcome::Success { duration_ms, .. }
            | BuildOutcome::Failure { duration_ms, .. }
            | BuildOutcome::Cancelled { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success { .. })
    }

    /// The audit row this outcome appends, if any.
    pub fn audit_record(&self, cache_name: &str, now: DateTime<Utc>) -> Option<BuildErrorRecord> {
        match self {
            BuildOutcome::Failure { kind, message, .. } => {
                Some(BuildErrorRecord::new(cache_name, *kind, message.clone(), now))
            }
            BuildOutcome::Success { degraded_units, .. } if !degraded_units.is_empty() => {
                Some(BuildErrorRecord::new(
                    cache_name,
                    FailureKind::PartialBuildFailure,
                    format!("failed units: {}", degraded_units.join(", ")),
                    now,
                ))
            }
            _ => None,
        }
    }
}

/// One append-only audit row per failed (or degraded) build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildErrorRecord {
    pub id: Uuid,
    pub cache_name: String,
    pub kind: FailureKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl BuildErrorRecord {
    pub fn new(
        cache_name: &str,
        kind: FailureKind,
        message: String,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            cache_name: cache_name.to_string(),
            kind,
            message,
            occurred_at,
        }
    }
}

/// Returned by the build runner once a build has been recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub cache_name: String,
    pub trigger: BuildTrigger,
    pub outcome: BuildOutcome,
    pub status_after: CacheStatus,
    pub units_completed: u32,
    pub units_total: u32,
    pub failed_units: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_for_degraded_success() {
        let outcome = BuildOutcome::Success {
            duration_ms: 1,
            record_count: 10,
            degraded_units: vec!["2025-07".to_string()],
        };
        let record = outcome.audit_record("hm", Utc::now()).unwrap();
        assert_eq!(record.kind, FailureKind::PartialBuildFailure);
        assert!(record.message.contains("2025-07"));
    }

    #[test]
    fn test_no_audit_record_for_clean_success_or_cancel() {
        let clean = BuildOutcome::Success {
            duration_ms: 1,
            record_count: 10,
            degraded_units: vec![],
        };
        assert!(clean.audit_record("c", Utc::now()).is_none());

        let cancelled = BuildOutcome::Cancelled {
            duration_ms: 1,
            restore_status: CacheStatus::Inactive,
            partial: None,
        };
        assert!(cancelled.audit_record("c", Utc::now()).is_none());
    }
}
