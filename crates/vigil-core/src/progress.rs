//! Ephemeral progress of an in-flight build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress attached to an entry while it is `building`.
///
/// Counters only move forward within one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProgress {
    /// What the build produces as a whole, e.g. `2025` or `all`.
    pub target_unit: String,
    /// Unit being processed right now, e.g. `2025-07`.
    pub current_unit: Option<String>,
    /// Units processed so far, whether they succeeded or failed.
    pub units_completed: u32,
    pub units_total: u32,
    pub records_processed: u64,
    pub started_at: DateTime<Utc>,
    pub per_unit_durations_ms: Vec<u64>,
    pub failed_units: Vec<String>,
}

impl BuildProgress {
    pub fn new(target_unit: impl Into<String>, units_total: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            target_unit: target_unit.into(),
            current_unit: None,
            units_completed: 0,
            units_total,
            records_processed: 0,
            started_at,
            per_unit_durations_ms: vec![],
            failed_units: vec![],
        }
    }

    pub fn begin_unit(&mut self, key: impl Into<String>) {
        self.current_unit = Some(key.into());
    }

    /// Add records from a chunk of the unit in progress.
    pub fn add_records(&mut self, records: u64) {
        self.records_processed = self.records_processed.saturating_add(records);
    }

    pub fn finish_unit(&mut self, duration_ms: u64) {
        self.per_unit_durations_ms.push(duration_ms);
        self.units_completed = (self.units_completed + 1).min(self.units_total.max(1));
    }

    pub fn fail_unit(&mut self, key: impl Into<String>, duration_ms: u64) {
        self.failed_units.push(key.into());
        self.finish_unit(duration_ms);
    }

    pub fn progress_pct(&self) -> f64 {
        if self.units_total == 0 {
            return 0.0;
        }
        f64::from(self.units_completed) / f64::from(self.units_total) * 100.0
    }

    pub fn average_unit_ms(&self) -> Option<u64> {
        if self.per_unit_durations_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.per_unit_durations_ms.iter().sum();
        Some(sum / self.per_unit_durations_ms.len() as u64)
    }

    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let remaining = self.units_total.saturating_sub(self.units_completed);
        self.average_unit_ms().map(|avg| avg * u64::from(remaining))
    }

    /// Full-build duration projected from the units measured so far.
    pub fn projected_total_ms(&self) -> Option<u64> {
        self.average_unit_ms()
            .map(|avg| avg * u64::from(self.units_total.max(1)))
    }
}

/// Processing-status surface polled by heat-map dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub is_processing: bool,
    pub current_month: Option<String>,
    pub progress: ProgressPercentage,
    pub processing_stats: ProcessingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPercentage {
    pub percentage: f64,
    pub units_completed: u32,
    pub units_total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub average_time_per_month: Option<u64>,
    pub records_processed: u64,
    pub estimated_remaining_ms: Option<u64>,
}

impl ProcessingStatus {
    pub fn idle() -> Self {
        Self {
            is_processing: false,
            current_month: None,
            progress: ProgressPercentage {
                percentage: 0.0,
                units_completed: 0,
                units_total: 0,
            },
            processing_stats: ProcessingStats {
                average_time_per_month: None,
                records_processed: 0,
                estimated_remaining_ms: None,
            },
        }
    }
}

impl From<&BuildProgress> for ProcessingStatus {
    fn from(p: &BuildProgress) -> Self {
        Self {
            is_processing: true,
            current_month: p.current_unit.clone(),
            progress: ProgressPercentage {
                percentage: p.progress_pct(),
                units_completed: p.units_completed,
                units_total: p.units_total,
            },
            processing_stats: ProcessingStats {
                average_time_per_month: p.average_unit_ms(),
                records_processed: p.records_processed,
                estimated_remaining_ms: p.estimated_remaining_ms(),
            },
        }
    }
}
