//! Orchestrator configuration.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for policy evaluation, the refresh gate, and build supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum time between two manual refreshes of one cache.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    /// Hard deadline for a single build.
    #[serde(default = "default_build_deadline")]
    pub build_deadline_secs: u64,
    /// A build without a progress heartbeat for this long is considered wedged.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_heartbeat_check_interval")]
    pub heartbeat_check_interval_ms: u64,
    /// How long a cold-start read waits for the first build.
    #[serde(default = "default_cold_start_timeout")]
    pub cold_start_timeout_secs: u64,
    /// Attempts per heat-map unit before the unit is marked failed.
    #[serde(default = "default_unit_retry_attempts")]
    pub unit_retry_attempts: u32,
    #[serde(default = "default_unit_retry_delay")]
    pub unit_retry_delay_ms: u64,
    /// UTC offset of the calendar used by `once_a_day`.
    #[serde(default)]
    pub reference_utc_offset_minutes: i32,
    #[serde(default = "default_dynamic_min_ttl")]
    pub dynamic_min_ttl_minutes: u32,
    #[serde(default = "default_dynamic_max_ttl")]
    pub dynamic_max_ttl_minutes: u32,
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,
}

fn default_cooldown_minutes() -> u32 {
    30
}

fn default_build_deadline() -> u64 {
    900
}

fn default_stall_timeout() -> u64 {
    120
}

fn default_heartbeat_check_interval() -> u64 {
    1_000
}

fn default_cold_start_timeout() -> u64 {
    30
}

fn default_unit_retry_attempts() -> u32 {
    2
}

fn default_unit_retry_delay() -> u64 {
    500
}

fn default_dynamic_min_ttl() -> u32 {
    5
}

fn default_dynamic_max_ttl() -> u32 {
    240
}

fn default_scheduler_interval() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            build_deadline_secs: default_build_deadline(),
            stall_timeout_secs: default_stall_timeout(),
            heartbeat_check_interval_ms: default_heartbeat_check_interval(),
            cold_start_timeout_secs: default_cold_start_timeout(),
            unit_retry_attempts: default_unit_retry_attempts(),
            unit_retry_delay_ms: default_unit_retry_delay(),
            reference_utc_offset_minutes: 0,
            dynamic_min_ttl_minutes: default_dynamic_min_ttl(),
            dynamic_max_ttl_minutes: default_dynamic_max_ttl(),
            scheduler_interval_secs: default_scheduler_interval(),
        }
    }
}

impl OrchestratorConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    pub fn build_deadline(&self) -> Duration {
        Duration::from_secs(self.build_deadline_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms.max(1))
    }

    pub fn cold_start_timeout(&self) -> Duration {
        Duration::from_secs(self.cold_start_timeout_secs)
    }

    pub fn unit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.unit_retry_delay_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs.max(1))
    }

    /// Falls back to UTC when the configured offset is out of range.
    pub fn reference_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.reference_utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}
