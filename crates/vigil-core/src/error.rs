//! Error types for Vigil.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Registry errors
    #[error("Cache not found: {0}")]
    CacheNotFound(String),

    #[error("Invalid cache definition: {0}")]
    InvalidDefinition(String),

    // Build errors
    #[error("Build already in progress for cache: {0}")]
    AlreadyBuilding(String),

    #[error("Build timeout for cache {name} after {seconds} seconds")]
    BuildTimeout { name: String, seconds: u64 },

    #[error("Build cancelled for cache: {0}")]
    BuildCancelled(String),

    #[error("Aggregation producer failed: {0}")]
    ProducerFailure(String),

    #[error("Partial build failure, failed units: {failed_units:?}")]
    PartialBuildFailure { failed_units: Vec<String> },

    // Read errors
    #[error("No data available yet for cache: {0}")]
    NoDataYet(String),

    #[error("First build still in progress for cache: {0}")]
    BuildInProgress(String),

    // Refresh gate / access errors
    #[error("Manual refresh cooling down for {name}: {minutes_remaining} minutes remaining")]
    CooldownActive {
        name: String,
        minutes_remaining: i64,
    },

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// A second build request racing an in-flight build is a no-op, not a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::AlreadyBuilding(_))
    }

    /// Conditions handed back to the caller as typed answers rather than
    /// system faults. These are never logged at error level.
    pub fn is_caller_condition(&self) -> bool {
        matches!(
            self,
            Error::CooldownActive { .. }
                | Error::CacheNotFound(_)
                | Error::NoDataYet(_)
                | Error::BuildInProgress(_)
                | Error::AuthorizationDenied(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
