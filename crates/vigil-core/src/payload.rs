//! Cached aggregate payloads.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unit key used by caches built in one piece.
pub const FULL_UNIT_KEY: &str = "all";

/// One aggregated bucket, e.g. the transaction count for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    pub bucket: String,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

impl AggregateRow {
    pub fn new(bucket: impl Into<String>, count: u64) -> Self {
        Self {
            bucket: bucket.into(),
            count,
            total: None,
        }
    }
}

/// Slice of source data a producer is asked to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitSpec {
    Full,
    Month { year: i32, month: u32 },
}

impl UnitSpec {
    /// Storage key of the unit: `all` or `YYYY-MM`.
    pub fn key(&self) -> String {
        match self {
            UnitSpec::Full => FULL_UNIT_KEY.to_string(),
            UnitSpec::Month { year, month } => format!("{:04}-{:02}", year, month),
        }
    }

    /// Month units of `year`, January first, stopping at the month containing
    /// `today` when the year is still in progress. Empty for future years.
    pub fn months_of(year: i32, today: NaiveDate) -> Vec<UnitSpec> {
        let last_month = if year < today.year() {
            12
        } else if year == today.year() {
            today.month()
        } else {
            0
        };
        (1..=last_month)
            .map(|month| UnitSpec::Month { year, month })
            .collect()
    }
}

/// The rows committed for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadUnit {
    pub rows: Vec<AggregateRow>,
    pub committed_at: DateTime<Utc>,
}

/// Everything currently servable for one cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPayload {
    pub cache_name: String,
    pub units: BTreeMap<String, PayloadUnit>,
}

impl CachedPayload {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            units: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn record_count(&self) -> u64 {
        self.units.values().map(|u| u.rows.len() as u64).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &AggregateRow> {
        self.units.values().flat_map(|u| u.rows.iter())
    }

    pub fn unit_keys(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn last_committed_at(&self) -> Option<DateTime<Utc>> {
        self.units.values().map(|u| u.committed_at).max()
    }
}
