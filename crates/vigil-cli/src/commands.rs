//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator and its HTTP API
    Serve {
        /// Path to the server configuration
        #[arg(short, long, default_value = "vigil.yaml")]
        config: PathBuf,
    },

    /// Inspect and operate caches
    Caches {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List every cache with its status
    List,

    /// Read a cache payload
    Get {
        name: String,
    },

    /// Show the status of one cache
    Status {
        name: String,
    },

    /// Show heat-map processing progress
    Processing {
        name: String,
    },

    /// Start a background build if the cache is stale
    EnsureFresh {
        name: String,
    },

    /// Rebuild now (admin, rate limited)
    Refresh {
        name: String,

        /// Return once the build reports progress
        #[arg(short, long)]
        wait: bool,
    },

    /// Cancel the running build (admin)
    Cancel {
        name: String,
    },

    /// Signal that new source data is available
    Invalidate {
        name: String,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Report usage signals for the dynamic policy
    Usage {
        name: String,

        #[arg(long, default_value_t = 0.0)]
        reads_per_hour: f64,

        #[arg(long, default_value_t = 0)]
        mutations: u64,
    },

    /// Change policies of one cache, or of all caches with --all (admin)
    Policy {
        /// Cache name
        name: Option<String>,

        #[arg(long, conflicts_with = "name")]
        all: bool,

        /// manual, once_a_day, all_app_restarts, new_data_flag or dynamic
        #[arg(long)]
        update_policy: Option<String>,

        /// `never` or a number of minutes
        #[arg(long)]
        expiration: Option<String>,

        #[arg(long)]
        auto_refresh: Option<bool>,
    },

    /// Register the configured baseline caches (admin)
    Initialize,

    /// Reset counters and payload (admin)
    Reset {
        name: String,
    },

    /// Show recent build errors
    Errors {
        name: String,

        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
