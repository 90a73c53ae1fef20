//! Vigil Core
//!
//! Domain vocabulary for the Vigil cache lifecycle orchestrator: cache entries
//! and their state machine, build progress, expiration policies, the manual
//! refresh gate, and the port traits implemented by storage and producer
//! adapters. This crate performs no I/O.

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod gate;
pub mod outcome;
pub mod payload;
pub mod policy;
pub mod ports;
pub mod progress;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use entry::{
    BuildTrigger, CacheDefinition, CacheEntry, CacheStatus, EntityType, ExpirationPolicy, Health,
    PolicyUpdate, UpdatePolicy, UsageSignals,
};
pub use error::{Error, Result};
pub use gate::RefreshGate;
pub use outcome::{BuildErrorRecord, BuildOutcome, BuildSummary, FailureKind};
pub use payload::{AggregateRow, CachedPayload, UnitSpec};
pub use policy::{Freshness, PolicyEngine};
pub use progress::{BuildProgress, ProcessingStatus};
