//! Loading and validation of the dashboard settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `FEDWATCH_DASHBOARD_`. An example can be found in `configs/dashboard.toml`.

use std::{fmt, path::Path, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationErrors};

use crate::view::COMPLETED_VISIBLE_FOR;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined dashboard settings.
pub struct DashboardSettings {
    #[validate]
    pub server: ServerSettings,
    #[validate]
    pub poll: PollSettings,
    pub log: LoggingSettings,
}

impl DashboardSettings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: DashboardSettings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedwatch_dashboard").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Where the fedwatch server is reached.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [server]
/// url = "http://127.0.0.1:8000"
/// ```
///
/// **Environment variable**
/// ```text
/// FEDWATCH_DASHBOARD_SERVER__URL=http://10.0.0.2:8000
/// ```
pub struct ServerSettings {
    #[validate(url)]
    pub url: String,
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Polling settings.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [poll]
/// interval_ms = 2000
/// request_timeout_ms = 5000
/// completed_visible_ms = 5000
/// ```
pub struct PollSettings {
    /// The period of the poll cycles.
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    /// How long a single fetch may take before it counts as failed.
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
    /// How long the completion notice stays up after a run ended.
    #[serde(default = "default_completed_visible_ms")]
    pub completed_visible_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_completed_visible_ms() -> u64 {
    COMPLETED_VISIBLE_FOR.as_millis() as u64
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn completed_visible_for(&self) -> Duration {
        Duration::from_millis(self.completed_visible_ms)
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives, see the [`EnvFilter`] documentation.
    ///
    /// Logs go to stderr so they do not tear the rendered dashboard.
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
