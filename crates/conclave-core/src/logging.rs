//! Logging bootstrap
//!
//! The core only emits `tracing` events. Hosts embedding it call
//! [`init_logging`] once at startup (or install their own subscriber).

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "conclave=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: default_filter(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails with [`Error::Configuration`] if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Configuration(format!("logging already initialized: {e}")))
}
