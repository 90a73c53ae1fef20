//! Server and client configuration.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vigil_core::{CacheDefinition, OrchestratorConfig};

/// Server configuration, read from a YAML file by `vigil serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// PostgreSQL URL. Without one the registry lives in memory.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_producer_url")]
    pub producer_url: String,
    #[serde(default = "default_producer_timeout_secs")]
    pub producer_timeout_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Registered at startup through initialize-defaults.
    #[serde(default)]
    pub caches: Vec<CacheDefinition>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_producer_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_producer_timeout_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_url: None,
            producer_url: default_producer_url(),
            producer_timeout_secs: default_producer_timeout_secs(),
            log_format: LogFormat::default(),
            orchestrator: OrchestratorConfig::default(),
            caches: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading server config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing server config {}", path.display()))?;
        for cache in &config.caches {
            cache.validate()?;
        }
        Ok(config)
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// API server URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Sent as `x-vigil-role`.
    #[serde(default)]
    pub role: Option<String>,
    /// Sent as `x-vigil-user`.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            role: None,
            user: None,
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from the platform config dir.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "vigil", "vigil")
            .context("could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "api_url" => self.api_url = value.to_string(),
            "role" => self.role = Some(value.to_string()),
            "user" => self.user = Some(value.to_string()),
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => bail!("invalid output format: {}", value),
                };
            }
            _ => bail!("unknown config key: {}", key),
        }
        Ok(())
    }
}
