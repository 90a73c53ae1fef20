//! Incremental heat-map builder.
//!
//! Builds a year of data one month at a time. Each month is committed on its
//! own, so a cancelled or partly failed build leaves every finished month
//! servable.

use crate::runner::{BuildContext, JobEnd, failure_message};
use futures::StreamExt;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use vigil_core::{AggregateRow, Error, OrchestratorConfig, Result, UnitSpec};

/// Bounded retries with exponential backoff for a single unit.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per unit, at least 1.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(1 << exp)
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            attempts: config.unit_retry_attempts.max(1),
            base_delay: config.unit_retry_delay(),
        }
    }
}

enum UnitResult {
    Committed(u64),
    Cancelled,
    Failed(Error),
}

pub(crate) async fn incremental_build(
    ctx: &BuildContext,
    units: &[UnitSpec],
    retry: &RetryPolicy,
) -> Result<JobEnd> {
    let mut committed = 0u32;
    let mut failed_units: Vec<String> = Vec::new();
    let mut last_error: Option<String> = None;

    for (idx, unit) in units.iter().enumerate() {
        if ctx.is_cancelled() {
            return cancelled(ctx, units, committed).await;
        }

        let key = unit.key();
        ctx.begin_unit(&key).await;
        let unit_started = Instant::now();

        match build_unit(ctx, *unit, retry).await {
            UnitResult::Committed(records) => {
                committed += 1;
                ctx.finish_unit(unit_started.elapsed()).await;
                info!(
                    cache = %ctx.name,
                    unit = %key,
                    records,
                    done = idx + 1,
                    total = units.len(),
                    "Unit committed"
                );
            }
            UnitResult::Cancelled => {
                return cancelled(ctx, units, committed).await;
            }
            UnitResult::Failed(e) => {
                warn!(cache = %ctx.name, unit = %key, error = %e, "Unit failed, continuing");
                ctx.fail_unit(&key, unit_started.elapsed()).await;
                last_error = Some(failure_message(&e));
                failed_units.push(key);
            }
        }
    }

    if !units.is_empty() && committed == 0 {
        return Err(Error::ProducerFailure(format!(
            "all {} units failed; last error: {}",
            units.len(),
            last_error.unwrap_or_default()
        )));
    }

    Ok(JobEnd::Completed {
        record_count: servable_records(ctx).await?,
        failed_units,
    })
}

async fn build_unit(ctx: &BuildContext, unit: UnitSpec, retry: &RetryPolicy) -> UnitResult {
    let mut attempt = 1;
    loop {
        let result = match fetch_unit(ctx, unit).await {
            Ok(Some(rows)) => {
                let records = rows.len() as u64;
                ctx.payloads
                    .commit_unit(&ctx.name, &unit.key(), rows, ctx.clock.now())
                    .await
                    .map(|_| records)
            }
            Ok(None) => return UnitResult::Cancelled,
            Err(e) => Err(e),
        };

        match result {
            Ok(records) => return UnitResult::Committed(records),
            Err(e) if attempt >= retry.attempts => return UnitResult::Failed(e),
            Err(e) => {
                let delay = retry.delay_for(attempt);
                warn!(
                    cache = %ctx.name,
                    unit = %unit.key(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Unit attempt failed, retrying"
                );
                if !ctx.backoff(delay).await {
                    return UnitResult::Cancelled;
                }
                attempt += 1;
            }
        }
    }
}

/// Collect one unit's rows. `None` when cancelled at a chunk boundary; the
/// partial unit is discarded.
async fn fetch_unit(ctx: &BuildContext, unit: UnitSpec) -> Result<Option<Vec<AggregateRow>>> {
    if ctx.is_cancelled() {
        return Ok(None);
    }
    let mut stream = ctx
        .producer
        .produce(&ctx.name, ctx.entity_type, unit)
        .await?;

    let mut rows = Vec::new();
    loop {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        match stream.next().await {
            Some(Ok(chunk)) => {
                ctx.record_chunk(chunk.len()).await;
                rows.extend(chunk);
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    if ctx.is_cancelled() {
        return Ok(None);
    }
    Ok(Some(rows))
}

async fn cancelled(ctx: &BuildContext, units: &[UnitSpec], committed: u32) -> Result<JobEnd> {
    let present = ctx
        .payloads
        .load(&ctx.name)
        .await?
        .map(|p| p.unit_keys())
        .unwrap_or_default();
    let missing_units = units
        .iter()
        .map(UnitSpec::key)
        .filter(|key| !present.contains(key))
        .collect();

    Ok(JobEnd::Cancelled {
        committed_units: committed,
        missing_units,
        record_count: servable_records(ctx).await?,
    })
}

async fn servable_records(ctx: &BuildContext) -> Result<u64> {
    Ok(ctx
        .payloads
        .load(&ctx.name)
        .await?
        .map(|p| p.record_count())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(2_000));
    }

    #[test]
    fn test_attempts_floor_is_one() {
        let config = OrchestratorConfig {
            unit_retry_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from(&config).attempts, 1);
    }
}
