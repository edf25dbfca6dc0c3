//! Settings for the events server
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. `config/breaker-events.{toml,yaml,json}` if present
//! 3. `BREAKER_EVENTS__*` environment variables, `__` separating nested keys
//!    (e.g. `BREAKER_EVENTS__CIRCUIT_BREAKERS__EVENT_BUFFER_SIZE=500`)
//!
//! The `config` crate folds table keys to lowercase, so breaker instances
//! are best declared as a list that carries the exact name:
//!
//! ```toml
//! [[circuit_breakers.instances]]
//! name = "backendB"
//! sliding_window_size = 2
//! ```

use breaker_events::RegistryConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_CONFIG_FILE: &str = "config/breaker-events";
pub const ENV_PREFIX: &str = "BREAKER_EVENTS";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    Invalid(#[from] breaker_events::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_addr: String,
    /// Fallback filter directive when `RUST_LOG` is unset
    pub log_level: String,
    /// Interval between SSE keep-alive comments
    pub keep_alive_interval_ms: u64,
    pub circuit_breakers: RegistryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".to_string(),
            log_level: "info".to_string(),
            keep_alive_interval_ms: 15_000,
            circuit_breakers: RegistryConfig::default(),
        }
    }
}

impl Settings {
    /// Load from the default config file and the environment
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from `path` (extension optional) and the environment
    pub fn load_from(path: &str) -> Result<Self, SettingsError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name(path).required(false))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.circuit_breakers.validate()?;
        Ok(settings)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms.max(1))
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `level`. Does nothing if a subscriber is already set.
pub fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
