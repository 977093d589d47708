//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;

/// Embedded default configuration (compiled into the library)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Top-level configuration for the coordination core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Task queue settings
    #[serde(default)]
    pub queue: QueueConfig,
    /// Conflict detection and collaboration settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Child agent and intervention settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load configuration from files and environment
///
/// Sources, lowest priority first: embedded defaults, `config/conclave.*`,
/// `config/local.*`, then `CONCLAVE_*` variables (`__` separates sections,
/// e.g. `CONCLAVE_QUEUE__CAPACITY=64`). A `.env` file is read first if present.
pub fn load_config() -> Result<CoreConfig> {
    let _ = dotenvy::dotenv();

    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/conclave").required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(
            Environment::with_prefix("CONCLAVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build configuration: {e}")))?;

    deserialize(config)
}

/// Load configuration from a TOML string layered over the embedded defaults.
pub fn load_config_from_str(overrides: &str) -> Result<CoreConfig> {
    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::from_str(overrides, FileFormat::Toml))
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build configuration: {e}")))?;

    deserialize(config)
}

fn deserialize(config: Config) -> Result<CoreConfig> {
    let parsed: CoreConfig = config
        .try_deserialize()
        .map_err(|e| Error::Configuration(format!("failed to deserialize configuration: {e}")))?;
    parsed.validate()?;
    Ok(parsed)
}

impl CoreConfig {
    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(Error::Configuration(
                "queue.capacity must be at least 1".to_string(),
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "queue.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.coordinator.history_limit == 0 {
            return Err(Error::Configuration(
                "coordinator.history_limit must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.host_agent.trim().is_empty() {
            return Err(Error::Configuration(
                "orchestrator.host_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
