//! Build supervision: hard deadline and stalled-heartbeat detection.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant, interval, sleep};
use tracing::debug;
use vigil_core::OrchestratorConfig;

/// Progress heartbeat of one build. Beats on every chunk and unit boundary.
#[derive(Clone)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Instant::now());
        Self { tx: Arc::new(tx) }
    }

    pub fn beat(&self) {
        self.tx.send_replace(Instant::now());
    }

    pub fn subscribe(&self) -> watch::Receiver<Instant> {
        self.tx.subscribe()
    }

    /// Time since the last beat.
    pub fn idle(&self) -> Duration {
        self.tx.borrow().elapsed()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogLimits {
    pub deadline: Duration,
    pub stall_timeout: Duration,
    pub check_interval: Duration,
}

impl From<&OrchestratorConfig> for WatchdogLimits {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            deadline: config.build_deadline(),
            stall_timeout: config.stall_timeout(),
            check_interval: config.heartbeat_check_interval(),
        }
    }
}

/// How a supervised job ended.
#[derive(Debug)]
pub enum Supervised<T> {
    Finished(T),
    DeadlineExceeded(Duration),
    Stalled(Duration),
}

/// Drive `job` until it finishes, the deadline passes, or the heartbeat goes
/// quiet for longer than the stall timeout. The job future is dropped in the
/// latter two cases.
pub async fn supervise<F>(job: F, limits: WatchdogLimits, heartbeat: &Heartbeat) -> Supervised<F::Output>
where
    F: Future,
{
    tokio::pin!(job);
    let deadline = sleep(limits.deadline);
    tokio::pin!(deadline);
    let mut ticker = interval(limits.check_interval);

    loop {
        tokio::select! {
            biased;
            out = &mut job => return Supervised::Finished(out),
            _ = &mut deadline => return Supervised::DeadlineExceeded(limits.deadline),
            _ = ticker.tick() => {
                let idle = heartbeat.idle();
                if idle >= limits.stall_timeout {
                    return Supervised::Stalled(idle);
                }
                debug!(idle_ms = idle.as_millis() as u64, "Build heartbeat ok");
            }
        }
    }
}
