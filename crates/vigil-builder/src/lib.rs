//! Vigil Builder
//!
//! Build execution and orchestration: the build job runner with its watchdog,
//! the incremental heat-map builder, the orchestrator facade, and the
//! background refresh scheduler.

pub mod heatmap;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod watchdog;

pub use heatmap::RetryPolicy;
pub use orchestrator::{CacheRead, CacheStatusView, Orchestrator, RefreshReceipt, StartupReport};
pub use runner::{BuildJobRunner, BuildTicket};
pub use scheduler::RefreshScheduler;
pub use watchdog::{Heartbeat, Supervised, WatchdogLimits};
