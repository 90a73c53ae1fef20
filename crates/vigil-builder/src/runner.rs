//! Build job runner.
//!
//! A build is claimed with a compare-and-transition into `building`, executed
//! under the watchdog, and always finished by recording an outcome, so an
//! entry never stays `building` once its job is gone. A panicking producer
//! is recorded as a failure like any other.

use crate::heatmap::{self, RetryPolicy};
use crate::watchdog::{self, Heartbeat, Supervised, WatchdogLimits};
use chrono::Datelike;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::time::{Duration, Instant, interval, sleep};
use tracing::{debug, error, info, warn};
use vigil_core::outcome::PartialData;
use vigil_core::payload::FULL_UNIT_KEY;
use vigil_core::ports::{AggregationProducer, CacheRegistry, PayloadStore};
use vigil_core::{
    BuildOutcome, BuildProgress, BuildSummary, BuildTrigger, CacheEntry, CacheStatus, Clock,
    EntityType, Error, FailureKind, OrchestratorConfig, Result, UnitSpec,
};

/// Everything a running job needs. Owned by exactly one build.
pub(crate) struct BuildContext {
    pub name: String,
    pub entity_type: EntityType,
    pub payloads: Arc<dyn PayloadStore>,
    pub producer: Arc<dyn AggregationProducer>,
    pub clock: Arc<dyn Clock>,
    pub cancel: watch::Receiver<bool>,
    pub heartbeat: Heartbeat,
    /// Beat period while the job is idle on purpose.
    pub keepalive: Duration,
    pub progress: Arc<RwLock<BuildProgress>>,
}

impl BuildContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sit out a retry delay with the heartbeat kept alive. Returns false as
    /// soon as the build is cancelled.
    pub async fn backoff(&self, delay: Duration) -> bool {
        let mut cancel = self.cancel.clone();
        let wait = sleep(delay);
        tokio::pin!(wait);
        let mut keepalive = interval(self.keepalive);

        loop {
            tokio::select! {
                _ = &mut wait => return true,
                _ = cancel.wait_for(|cancelled| *cancelled) => return false,
                _ = keepalive.tick() => self.heartbeat.beat(),
            }
        }
    }

    pub async fn begin_unit(&self, key: &str) {
        self.progress.write().await.begin_unit(key);
    }

    pub async fn record_chunk(&self, records: usize) {
        self.progress.write().await.add_records(records as u64);
        self.heartbeat.beat();
        debug!(cache = %self.name, records, "Chunk received");
    }

    pub async fn finish_unit(&self, elapsed: Duration) {
        self.progress
            .write()
            .await
            .finish_unit(elapsed.as_millis() as u64);
        self.heartbeat.beat();
    }

    pub async fn fail_unit(&self, key: &str, elapsed: Duration) {
        self.progress
            .write()
            .await
            .fail_unit(key, elapsed.as_millis() as u64);
        self.heartbeat.beat();
    }
}

/// How a job body ended when it was not an error.
#[derive(Debug)]
pub(crate) enum JobEnd {
    Completed {
        record_count: u64,
        failed_units: Vec<String>,
    },
    Cancelled {
        committed_units: u32,
        missing_units: Vec<String>,
        record_count: u64,
    },
}

/// Bookkeeping for a build running in this process.
struct ActiveBuild {
    cancel_tx: watch::Sender<bool>,
    heartbeat: Heartbeat,
    progress: Arc<RwLock<BuildProgress>>,
    done_rx: watch::Receiver<bool>,
}

/// A build that won the claim and must now be executed.
pub struct BuildTicket {
    name: String,
    trigger: BuildTrigger,
    restore_status: CacheStatus,
    entity_type: EntityType,
    units: Vec<UnitSpec>,
    context: BuildContext,
    done_tx: watch::Sender<bool>,
}

impl BuildTicket {
    pub fn cache_name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &BuildTrigger {
        &self.trigger
    }
}

/// Runs builds against the registry, payload store, and producer.
pub struct BuildJobRunner {
    registry: Arc<dyn CacheRegistry>,
    payloads: Arc<dyn PayloadStore>,
    producer: Arc<dyn AggregationProducer>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    active: Arc<RwLock<HashMap<String, ActiveBuild>>>,
}

impl BuildJobRunner {
    pub fn new(
        registry: Arc<dyn CacheRegistry>,
        payloads: Arc<dyn PayloadStore>,
        producer: Arc<dyn AggregationProducer>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            payloads,
            producer,
            clock,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claim and execute in one call.
    pub async fn run(&self, name: &str, trigger: BuildTrigger) -> Result<BuildSummary> {
        let entry = self
            .registry
            .get(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        let ticket = self.claim(name, entry.status, trigger).await?;
        self.execute(ticket).await
    }

    /// Move `name` from `expected` to `building`.
    ///
    /// Fails with the benign `AlreadyBuilding` when another caller got there
    /// first or the stored status is no longer `expected`. The build is
    /// registered as running here before the registry write, so no observer
    /// sees a `building` entry without a live job behind it.
    pub async fn claim(
        &self,
        name: &str,
        expected: CacheStatus,
        trigger: BuildTrigger,
    ) -> Result<BuildTicket> {
        let entry = self
            .registry
            .get(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        if !expected.can_start_build() {
            debug!(cache = %name, expected = %expected, "Build claim lost");
            return Err(Error::AlreadyBuilding(name.to_string()));
        }

        let now = self.clock.now();
        let (target, units) = self.plan(&entry);
        let progress = Arc::new(RwLock::new(BuildProgress::new(
            target,
            units.len().max(1) as u32,
            now,
        )));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let heartbeat = Heartbeat::new();

        {
            let mut active = self.active.write().await;
            if active.contains_key(name) {
                debug!(cache = %name, "Build already running in this process");
                return Err(Error::AlreadyBuilding(name.to_string()));
            }
            active.insert(
                name.to_string(),
                ActiveBuild {
                    cancel_tx,
                    heartbeat: heartbeat.clone(),
                    progress: Arc::clone(&progress),
                    done_rx,
                },
            );
        }

        match self.registry.claim_build(name, expected, &trigger, now).await {
            Ok(true) => {}
            Ok(false) => {
                self.active.write().await.remove(name);
                debug!(cache = %name, expected = %expected, "Build claim lost");
                return Err(Error::AlreadyBuilding(name.to_string()));
            }
            Err(e) => {
                self.active.write().await.remove(name);
                return Err(e);
            }
        }

        let limits = WatchdogLimits::from(&self.config);
        Ok(BuildTicket {
            name: name.to_string(),
            trigger,
            restore_status: expected,
            entity_type: entry.entity_type,
            units,
            context: BuildContext {
                name: name.to_string(),
                entity_type: entry.entity_type,
                payloads: Arc::clone(&self.payloads),
                producer: Arc::clone(&self.producer),
                clock: Arc::clone(&self.clock),
                cancel: cancel_rx,
                heartbeat,
                keepalive: (limits.stall_timeout / 2).max(Duration::from_millis(1)),
                progress,
            },
            done_tx,
        })
    }

    /// Target label and unit list for one build of `entry`.
    fn plan(&self, entry: &CacheEntry) -> (String, Vec<UnitSpec>) {
        match entry.entity_type {
            EntityType::HeatMapCache => {
                let today = self
                    .clock
                    .now()
                    .with_timezone(&self.config.reference_offset())
                    .date_naive();
                let year = entry.target_year.unwrap_or_else(|| today.year());
                (year.to_string(), UnitSpec::months_of(year, today))
            }
            _ => (FULL_UNIT_KEY.to_string(), vec![UnitSpec::Full]),
        }
    }

    /// Execute a claimed build and record its outcome.
    pub async fn execute(&self, ticket: BuildTicket) -> Result<BuildSummary> {
        let BuildTicket {
            name,
            trigger,
            restore_status,
            entity_type,
            units,
            context,
            done_tx,
        } = ticket;
        let started = Instant::now();

        info!(
            cache = %name,
            entity_type = %entity_type,
            trigger = %trigger,
            units = units.len(),
            "Build started"
        );

        let limits = WatchdogLimits::from(&self.config);
        let retry = RetryPolicy::from(&self.config);
        let job = AssertUnwindSafe(async {
            match entity_type {
                EntityType::HeatMapCache => heatmap::incremental_build(&context, &units, &retry).await,
                _ => full_build(&context).await,
            }
        })
        .catch_unwind();
        let supervised = watchdog::supervise(job, limits, &context.heartbeat).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let progress = context.progress.read().await.clone();

        let outcome = match supervised {
            Supervised::Finished(Ok(Ok(JobEnd::Completed {
                record_count,
                failed_units,
            }))) => BuildOutcome::Success {
                duration_ms,
                record_count,
                degraded_units: failed_units,
            },
            Supervised::Finished(Ok(Ok(JobEnd::Cancelled {
                committed_units,
                missing_units,
                record_count,
            }))) => BuildOutcome::Cancelled {
                duration_ms,
                restore_status,
                partial: (committed_units > 0).then(|| PartialData {
                    record_count,
                    missing_units,
                    projected_duration_ms: progress.projected_total_ms().unwrap_or(duration_ms),
                }),
            },
            Supervised::Finished(Ok(Err(e))) => BuildOutcome::Failure {
                duration_ms,
                kind: FailureKind::ProducerFailure,
                message: failure_message(&e),
            },
            Supervised::Finished(Err(panic)) => BuildOutcome::Failure {
                duration_ms,
                kind: FailureKind::ProducerFailure,
                message: format!("Build panicked: {}", panic_message(&*panic)),
            },
            Supervised::DeadlineExceeded(after) => BuildOutcome::Failure {
                duration_ms,
                kind: FailureKind::BuildTimeout,
                message: Error::BuildTimeout {
                    name: name.clone(),
                    seconds: after.as_secs(),
                }
                .to_string(),
            },
            Supervised::Stalled(idle) => BuildOutcome::Failure {
                duration_ms,
                kind: FailureKind::BuildTimeout,
                message: format!(
                    "Build stalled for cache {}: no progress for {} seconds",
                    name,
                    idle.as_secs()
                ),
            },
        };

        let recorded = self
            .registry
            .record_build_result(&name, &outcome, self.clock.now())
            .await;

        self.active.write().await.remove(&name);
        done_tx.send_replace(true);

        let entry = match recorded {
            Ok(entry) => entry,
            Err(e) => {
                error!(cache = %name, error = %e, "Failed to record build result");
                return Err(e);
            }
        };

        match &outcome {
            BuildOutcome::Success {
                record_count,
                degraded_units,
                ..
            } if degraded_units.is_empty() => {
                info!(cache = %name, duration_ms, record_count, "Build completed");
            }
            BuildOutcome::Success { degraded_units, .. } => {
                warn!(
                    cache = %name,
                    duration_ms,
                    failed_units = ?degraded_units,
                    "Build completed with failed units"
                );
            }
            BuildOutcome::Failure { kind, message, .. } => {
                error!(
                    cache = %name,
                    duration_ms,
                    kind = kind.as_str(),
                    consecutive_failures = entry.consecutive_failures,
                    error = %message,
                    "Build failed"
                );
            }
            BuildOutcome::Cancelled { partial, .. } => {
                info!(
                    cache = %name,
                    duration_ms,
                    kept_partial = partial.is_some(),
                    status = %entry.status,
                    "Build cancelled"
                );
            }
        }

        Ok(BuildSummary {
            cache_name: name,
            trigger,
            outcome,
            status_after: entry.status,
            units_completed: progress.units_completed,
            units_total: progress.units_total,
            failed_units: progress.failed_units,
        })
    }

    /// Signal the running build of `name` to stop at its next boundary.
    pub async fn cancel(&self, name: &str) -> bool {
        match self.active.read().await.get(name) {
            Some(build) => {
                build.cancel_tx.send_replace(true);
                info!(cache = %name, "Build cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.active.read().await.contains_key(name)
    }

    pub async fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn progress(&self, name: &str) -> Option<BuildProgress> {
        let progress = {
            let active = self.active.read().await;
            Arc::clone(&active.get(name)?.progress)
        };
        let snapshot = progress.read().await.clone();
        Some(snapshot)
    }

    /// Wait for the build of `name` to finish. Returns false on timeout.
    ///
    /// Builds owned by another process are followed through the registry.
    pub async fn wait(&self, name: &str, timeout: Duration) -> Result<bool> {
        let done_rx = self
            .active
            .read()
            .await
            .get(name)
            .map(|b| b.done_rx.clone());

        match done_rx {
            Some(mut rx) => Ok(tokio::time::timeout(timeout, rx.wait_for(|done| *done))
                .await
                .is_ok()),
            None => {
                let poll = async {
                    loop {
                        match self.registry.get(name).await? {
                            Some(entry) if entry.status == CacheStatus::Building => {
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                            _ => return Ok::<(), Error>(()),
                        }
                    }
                };
                match tokio::time::timeout(timeout, poll).await {
                    Ok(result) => result.map(|_| true),
                    Err(_) => Ok(false),
                }
            }
        }
    }

    /// Wait until the build of `name` reports its first chunk or finishes.
    pub async fn wait_first_progress(&self, name: &str, timeout: Duration) -> bool {
        let watched = self
            .active
            .read()
            .await
            .get(name)
            .map(|b| (b.heartbeat.subscribe(), b.done_rx.clone()));

        let Some((mut beats, mut done)) = watched else {
            return true;
        };
        let first = async {
            tokio::select! {
                _ = beats.changed() => {}
                _ = done.wait_for(|d| *d) => {}
            }
        };
        tokio::time::timeout(timeout, first).await.is_ok()
    }
}

/// Generic build: one unit, streamed in full, swapped in with one commit.
async fn full_build(ctx: &BuildContext) -> Result<JobEnd> {
    ctx.begin_unit(FULL_UNIT_KEY).await;
    let unit_started = Instant::now();
    let mut stream = ctx
        .producer
        .produce(&ctx.name, ctx.entity_type, UnitSpec::Full)
        .await?;

    let cancelled = || JobEnd::Cancelled {
        committed_units: 0,
        missing_units: vec![FULL_UNIT_KEY.to_string()],
        record_count: 0,
    };

    let mut rows = Vec::new();
    loop {
        if ctx.is_cancelled() {
            return Ok(cancelled());
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
        return Ok(cancelled());
    }

    let record_count = rows.len() as u64;
    ctx.payloads
        .replace(&ctx.name, rows, ctx.clock.now())
        .await?;
    ctx.finish_unit(unit_started.elapsed()).await;

    Ok(JobEnd::Completed {
        record_count,
        failed_units: vec![],
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Producer messages are recorded verbatim.
pub(crate) fn failure_message(e: &Error) -> String {
    match e {
        Error::ProducerFailure(message) => message.clone(),
        other => other.to_string(),
    }
}
