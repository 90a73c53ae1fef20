//! Background refresh loop for policy-driven caches.

use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};
use vigil_core::{BuildTrigger, CacheStatus, Result};

/// Periodically re-checks every auto-refresh cache and starts builds for the
/// stale ones. Manual-policy caches are left alone.
pub struct RefreshScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let interval = orchestrator.config().scheduler_interval();
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!(
            interval_secs = self.interval.as_secs(),
            "Starting refresh scheduler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Refresh scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Refresh scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the registry. Returns the caches a build was started for.
    pub async fn tick(&self) -> Result<Vec<String>> {
        self.orchestrator.recover_orphans().await?;

        let mut started = Vec::new();
        for view in self.orchestrator.list_status().await? {
            let entry = &view.entry;
            if !entry.auto_refresh
                || !entry.update_policy.is_policy_driven()
                || entry.status == CacheStatus::Building
                || !view.stale
            {
                continue;
            }

            match self
                .orchestrator
                .ensure_fresh_with(&entry.name, BuildTrigger::Scheduler)
                .await
            {
                Ok(read) if read.building => started.push(entry.name.clone()),
                Ok(_) => {}
                Err(e) => warn!(cache = %entry.name, error = %e, "Scheduled refresh failed"),
            }
        }

        debug!(started = started.len(), "Refresh scheduler tick");
        Ok(started)
    }
}
