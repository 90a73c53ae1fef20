//! Orchestrator facade: the single entry point for dashboards, operators, and
//! the background scheduler.

use crate::runner::{BuildJobRunner, BuildTicket};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vigil_core::policy::StaleReason;
use vigil_core::ports::{AggregationProducer, CacheRegistry, PayloadStore};
use vigil_core::{
    BuildErrorRecord, BuildOutcome, BuildProgress, BuildTrigger, CacheDefinition, CacheEntry,
    CachedPayload, CacheStatus, Clock, Error, FailureKind, Freshness, OrchestratorConfig,
    PolicyEngine, PolicyUpdate, ProcessingStatus, RefreshGate, Result, UpdatePolicy,
    UsageSignals,
};

const MAX_RECENT_ERRORS: u32 = 100;

/// Result of a read or freshness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRead {
    pub cache_name: String,
    pub payload: Option<CachedPayload>,
    /// Served from previously committed data without waiting for a build.
    pub from_cache: bool,
    pub stale: bool,
    /// A build for this cache is in flight.
    pub building: bool,
    pub degraded_units: Vec<String>,
}

/// Snapshot polled by status dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusView {
    #[serde(flatten)]
    pub entry: CacheEntry,
    pub hit_rate: f64,
    pub stale: bool,
    pub progress: Option<BuildProgress>,
}

/// Answer to an accepted manual refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReceipt {
    pub cache_name: String,
    pub requested_by: String,
    pub build_started: bool,
    pub cooldown_until: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupReport {
    pub expired: Vec<String>,
    pub recovered: Vec<String>,
}

pub struct Orchestrator {
    registry: Arc<dyn CacheRegistry>,
    payloads: Arc<dyn PayloadStore>,
    runner: Arc<BuildJobRunner>,
    policy: PolicyEngine,
    gate: RefreshGate,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn CacheRegistry>,
        payloads: Arc<dyn PayloadStore>,
        producer: Arc<dyn AggregationProducer>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = Arc::new(BuildJobRunner::new(
            Arc::clone(&registry),
            Arc::clone(&payloads),
            producer,
            Arc::clone(&clock),
            config.clone(),
        ));
        Self {
            registry,
            payloads,
            runner,
            policy: PolicyEngine::new(&config),
            gate: RefreshGate::new(config.cooldown()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn runner(&self) -> &Arc<BuildJobRunner> {
        &self.runner
    }

    async fn entry(&self, name: &str) -> Result<CacheEntry> {
        self.registry
            .get(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))
    }

    fn require_admin(is_admin: bool, action: &str) -> Result<()> {
        if is_admin {
            Ok(())
        } else {
            Err(Error::AuthorizationDenied(format!(
                "{} requires the admin role",
                action
            )))
        }
    }

    /// Process-start housekeeping: expire `all_app_restarts` entries and
    /// recover builds orphaned by a previous process.
    pub async fn startup(&self) -> Result<StartupReport> {
        let mut report = StartupReport::default();
        let now = self.clock.now();

        for entry in self.registry.list().await? {
            if entry.update_policy == UpdatePolicy::AllAppRestarts
                && entry.has_succeeded()
                && entry.status == CacheStatus::Active
                && self
                    .registry
                    .compare_and_transition(
                        &entry.name,
                        CacheStatus::Active,
                        CacheStatus::Expired,
                        now,
                    )
                    .await?
            {
                report.expired.push(entry.name);
            }
        }

        report.recovered = self.recover_orphans().await?;
        info!(
            expired = report.expired.len(),
            recovered = report.recovered.len(),
            "Startup sweep complete"
        );
        Ok(report)
    }

    /// Fail entries stuck in `building` with no live job past the deadline.
    ///
    /// An entry is only failed at the version observed here, so a build
    /// claimed in the meantime is never touched.
    pub async fn recover_orphans(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let deadline = ChronoDuration::from_std(self.config.build_deadline())
            .unwrap_or_else(|_| ChronoDuration::seconds(self.config.build_deadline_secs as i64));
        let mut recovered = Vec::new();

        for entry in self.registry.list().await? {
            if entry.status != CacheStatus::Building || self.runner.is_running(&entry.name).await {
                continue;
            }
            let age = entry.last_build_started_at.map(|started| now - started);
            if age.is_some_and(|age| age < deadline) {
                continue;
            }

            let outcome = BuildOutcome::Failure {
                duration_ms: age.map_or(0, |a| a.num_milliseconds().max(0) as u64),
                kind: FailureKind::BuildTimeout,
                message: format!(
                    "Build for cache {} was abandoned without finishing",
                    entry.name
                ),
            };
            if self
                .registry
                .recover_orphan(&entry.name, entry.version, &outcome, now)
                .await?
                .is_none()
            {
                debug!(cache = %entry.name, "Orphan candidate changed before recovery");
                continue;
            }
            warn!(cache = %entry.name, "Recovered orphaned build");
            recovered.push(entry.name);
        }
        Ok(recovered)
    }

    /// Dashboard read. Serves the last committed payload when one exists
    /// and waits for the first build otherwise.
    pub async fn get(&self, name: &str) -> Result<CacheRead> {
        let read = self.check_freshness(name, None).await?;

        if read.payload.is_some() {
            if read.stale {
                self.registry.record_miss(name).await?;
            } else {
                self.registry.record_hit(name).await?;
            }
            return Ok(read);
        }

        self.registry.record_miss(name).await?;
        if !read.building {
            return Err(Error::NoDataYet(name.to_string()));
        }

        debug!(cache = %name, "Cold start read waiting for first build");
        if !self
            .runner
            .wait(name, self.config.cold_start_timeout())
            .await?
        {
            return Err(Error::BuildInProgress(name.to_string()));
        }

        let entry = self.entry(name).await?;
        match self.payloads.load(name).await? {
            Some(payload) => Ok(CacheRead {
                cache_name: name.to_string(),
                payload: Some(payload),
                from_cache: false,
                stale: false,
                building: false,
                degraded_units: entry.degraded_units,
            }),
            None => Err(Error::NoDataYet(name.to_string())),
        }
    }

    /// Start a background build when stale; never blocks on the build.
    pub async fn ensure_fresh(&self, name: &str) -> Result<CacheRead> {
        self.check_freshness(name, None).await
    }

    /// `ensure_fresh` with an explicit trigger, used by the scheduler.
    pub async fn ensure_fresh_with(&self, name: &str, trigger: BuildTrigger) -> Result<CacheRead> {
        self.check_freshness(name, Some(trigger)).await
    }

    async fn check_freshness(&self, name: &str, trigger: Option<BuildTrigger>) -> Result<CacheRead> {
        let entry = self.entry(name).await?;
        let freshness = self.policy.evaluate(&entry, self.clock.now());
        let payload = self.payloads.load(name).await?;
        let mut building = entry.status == CacheStatus::Building;

        if let Freshness::Stale(reason) = freshness
            && !building
        {
            let trigger = trigger.unwrap_or_else(|| trigger_for(reason));
            debug!(cache = %name, reason = ?reason, trigger = %trigger, "Cache is stale");
            building = self.start_background(&entry, trigger).await?;
        }

        Ok(CacheRead {
            cache_name: name.to_string(),
            from_cache: payload.is_some(),
            payload,
            stale: !freshness.is_fresh(),
            building,
            degraded_units: entry.degraded_units,
        })
    }

    /// Claim and spawn a build. Returns whether a build is now in flight.
    async fn start_background(&self, entry: &CacheEntry, trigger: BuildTrigger) -> Result<bool> {
        let name = entry.name.as_str();
        let mut expected = entry.status;

        if expected == CacheStatus::Active {
            if self
                .registry
                .compare_and_transition(
                    name,
                    CacheStatus::Active,
                    CacheStatus::Expired,
                    self.clock.now(),
                )
                .await?
            {
                debug!(cache = %name, "Marked expired");
                expected = CacheStatus::Expired;
            } else {
                match self.registry.get(name).await?.map(|e| e.status) {
                    Some(CacheStatus::Building) => return Ok(true),
                    Some(CacheStatus::Expired) => expected = CacheStatus::Expired,
                    _ => return Ok(false),
                }
            }
        }

        match self.runner.claim(name, expected, trigger).await {
            Ok(ticket) => {
                self.spawn(ticket);
                Ok(true)
            }
            Err(e) if e.is_benign() => Ok(self
                .registry
                .get(name)
                .await?
                .is_some_and(|e| e.status == CacheStatus::Building)),
            Err(e) => Err(e),
        }
    }

    fn spawn(&self, ticket: BuildTicket) {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let name = ticket.cache_name().to_string();
            if let Err(e) = runner.execute(ticket).await {
                error!(cache = %name, error = %e, "Background build failed to complete");
            }
        });
    }

    /// Operator-triggered rebuild, rate limited by the refresh gate.
    ///
    /// The cooldown is spent only once the build is claimed. With `wait` the
    /// call returns once the build reports its first chunk.
    pub async fn refresh(
        &self,
        name: &str,
        requested_by: &str,
        is_admin: bool,
        wait: bool,
    ) -> Result<RefreshReceipt> {
        Self::require_admin(is_admin, "manual refresh")?;
        let entry = self.entry(name).await?;
        if entry.status == CacheStatus::Building || self.runner.is_running(name).await {
            return Err(Error::AlreadyBuilding(name.to_string()));
        }

        let now = self.clock.now();
        self.gate.check(&entry, now)?;

        let trigger = BuildTrigger::Manual {
            requested_by: requested_by.to_string(),
        };
        let ticket = match self.runner.claim(name, entry.status, trigger.clone()).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_benign() => {
                // The status moved since it was read, e.g. active -> expired.
                let current = self.entry(name).await?;
                self.runner.claim(name, current.status, trigger).await?
            }
            Err(e) => return Err(e),
        };
        self.spawn(ticket);

        let until = self.gate.next_cooldown(now);
        let cooldown_until = if self.registry.try_claim_cooldown(name, now, until).await? {
            until
        } else {
            self.entry(name).await?.cooldown_until.unwrap_or(until)
        };
        info!(
            cache = %name,
            requested_by = %requested_by,
            cooldown_until = %cooldown_until,
            "Manual refresh started"
        );

        if wait
            && !self
                .runner
                .wait_first_progress(name, self.config.cold_start_timeout())
                .await
        {
            debug!(cache = %name, "Refresh returned before first progress");
        }

        Ok(RefreshReceipt {
            cache_name: name.to_string(),
            requested_by: requested_by.to_string(),
            build_started: true,
            cooldown_until,
        })
    }

    pub async fn status(&self, name: &str) -> Result<CacheStatusView> {
        let entry = self.entry(name).await?;
        Ok(self.view(entry).await)
    }

    pub async fn list_status(&self) -> Result<Vec<CacheStatusView>> {
        let mut views = Vec::new();
        for entry in self.registry.list().await? {
            views.push(self.view(entry).await);
        }
        Ok(views)
    }

    async fn view(&self, entry: CacheEntry) -> CacheStatusView {
        let stale = !self.policy.is_fresh(&entry, self.clock.now());
        let progress = self.runner.progress(&entry.name).await;
        CacheStatusView {
            hit_rate: entry.hit_rate(),
            stale,
            progress,
            entry,
        }
    }

    pub async fn processing_status(&self, name: &str) -> Result<ProcessingStatus> {
        self.entry(name).await?;
        Ok(self
            .runner
            .progress(name)
            .await
            .map(|p| ProcessingStatus::from(&p))
            .unwrap_or_else(ProcessingStatus::idle))
    }

    /// Idempotently register caches with their baseline policies.
    pub async fn initialize_defaults(
        &self,
        definitions: &[CacheDefinition],
        is_admin: bool,
    ) -> Result<Vec<CacheEntry>> {
        Self::require_admin(is_admin, "initialize-defaults")?;
        for definition in definitions {
            definition.validate()?;
        }

        let now = self.clock.now();
        let mut entries = Vec::with_capacity(definitions.len());
        for definition in definitions {
            entries.push(self.registry.upsert_defaults(definition, now).await?);
        }
        info!(count = entries.len(), "Cache defaults initialized");
        Ok(entries)
    }

    /// Change policies for one cache, or all caches when `name` is `None`.
    pub async fn set_policy(
        &self,
        name: Option<&str>,
        update: &PolicyUpdate,
        is_admin: bool,
    ) -> Result<u64> {
        Self::require_admin(is_admin, "set-policy")?;
        if update.is_empty() {
            return Err(Error::InvalidDefinition(
                "policy update changes nothing".to_string(),
            ));
        }
        let changed = self
            .registry
            .set_policy(name, update, self.clock.now())
            .await?;
        info!(cache = ?name, changed, "Policy updated");
        Ok(changed)
    }

    /// New-data signal: the next freshness check reports stale.
    pub async fn invalidate(&self, name: &str, reason: Option<&str>) -> Result<()> {
        self.registry.invalidate(name, self.clock.now()).await?;
        info!(cache = %name, reason = reason.unwrap_or("unspecified"), "Cache invalidated");
        Ok(())
    }

    pub async fn report_usage(&self, name: &str, usage: UsageSignals) -> Result<()> {
        if !usage.reads_per_hour.is_finite() || usage.reads_per_hour < 0.0 {
            return Err(Error::InvalidDefinition(format!(
                "reads per hour must be a non-negative number, got {}",
                usage.reads_per_hour
            )));
        }
        self.registry
            .report_usage(name, usage, self.clock.now())
            .await
    }

    /// Ask the running build to stop. Returns false when nothing was running.
    pub async fn cancel(&self, name: &str, is_admin: bool) -> Result<bool> {
        Self::require_admin(is_admin, "cancel")?;
        self.entry(name).await?;
        Ok(self.runner.cancel(name).await)
    }

    /// Clear counters and payload and return to `inactive`.
    ///
    /// The registry row is reset before the payload is cleared. If clearing
    /// fails the entry already reads as never built, so leftover rows are
    /// only ever served as stale, and repeating the reset finishes the job.
    pub async fn reset(&self, name: &str, is_admin: bool) -> Result<CacheEntry> {
        Self::require_admin(is_admin, "reset")?;
        if self.runner.is_running(name).await {
            return Err(Error::AlreadyBuilding(name.to_string()));
        }
        let entry = self.registry.reset(name, self.clock.now()).await?;
        self.payloads.clear(name).await?;
        info!(cache = %name, "Cache reset");
        Ok(entry)
    }

    pub async fn recent_errors(&self, name: &str, limit: u32) -> Result<Vec<BuildErrorRecord>> {
        self.entry(name).await?;
        self.registry
            .recent_errors(name, limit.clamp(1, MAX_RECENT_ERRORS))
            .await
    }
}

fn trigger_for(reason: StaleReason) -> BuildTrigger {
    match reason {
        StaleReason::NeverBuilt => BuildTrigger::ColdStart,
        StaleReason::Invalidated => BuildTrigger::NewData,
        StaleReason::MarkedExpired | StaleReason::TtlElapsed | StaleReason::DayRolledOver => {
            BuildTrigger::Policy
        }
    }
}
