//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. Examples of
//! configuration files can be found in the `configs/` directory located in the repository root.

use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub api: ApiSettings,
    pub log: LoggingSettings,
    pub storage: StorageSettings,
    #[validate]
    pub training: TrainingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedwatch").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Deserialize, Clone)]
/// REST API settings.
pub struct ApiSettings {
    /// The address to which the REST API should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "0.0.0.0:8000"
    /// # or
    /// bind_address = "127.0.0.1:8000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDWATCH_API__BIND_ADDRESS=127.0.0.1:8000
    /// ```
    pub bind_address: SocketAddr,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Where the training ledger and the audit chain are kept.
pub enum StorageBackend {
    /// Two line-delimited JSON files, see `ledger_path` and `chain_path`.
    File,
    /// Process memory. Everything is lost on restart.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
/// Audit log settings.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [storage]
/// backend = "file"
/// ledger_path = "logs/ledger.log"
/// chain_path = "logs/blockchain.log"
/// ```
///
/// **Environment variable**
/// ```text
/// FEDWATCH_STORAGE__BACKEND=memory
/// ```
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub ledger_path: PathBuf,
    pub chain_path: PathBuf,
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_training"))]
/// Training supervisor settings.
///
/// The commands are argument vectors. The following placeholders are substituted in every
/// argument before a process is launched:
///
/// - server command: `{rounds}`, `{clients}` and `{server_address}`
/// - client command: `{cid}` and `{server_address}`
///
/// # Examples
///
/// **TOML**
/// ```text
/// [training]
/// working_dir = "flower"
/// server_command = ["python", "server.py", "--rounds={rounds}", "--clients={clients}"]
/// client_command = ["python", "client.py", "--cid={cid}", "--server-address={server_address}"]
/// flower_address = "127.0.0.1:8080"
/// ```
pub struct TrainingSettings {
    /// The directory the commands run in. Defaults to the current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[validate(length(min = 1))]
    pub server_command: Vec<String>,
    #[validate(length(min = 1))]
    pub client_command: Vec<String>,
    /// The address of the Flower server. Clients connect to it, and the status probe checks that
    /// it accepts TCP connections.
    pub flower_address: SocketAddr,
    /// How long the server gets to start before the clients are launched.
    pub startup_delay_ms: u64,
    /// The pause after each client launch.
    pub client_spawn_delay_ms: u64,
    /// How often the running processes are checked.
    pub monitor_interval_ms: u64,
    /// How long a stopped process may take to exit.
    pub stop_timeout_ms: u64,
    /// The timeout of the status probe.
    pub probe_timeout_ms: u64,
}

impl TrainingSettings {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn client_spawn_delay(&self) -> Duration {
        Duration::from_millis(self.client_spawn_delay_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Checks the training settings.
    fn validate_training(&self) -> Result<(), ValidationError> {
        // a zero interval would turn the monitor loop into a busy loop
        if self.monitor_interval_ms > 0 && self.probe_timeout_ms > 0 {
            Ok(())
        } else {
            Err(ValidationError::new("zero monitor interval or probe timeout"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_training(s: &TrainingSettings) -> Result<(), ValidationError> {
    s.validate_training()
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDWATCH_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
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
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
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
