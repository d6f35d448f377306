//! Broker connection configuration.
//!
//! Read once at startup and handed to the connection manager; never
//! re-read afterwards.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "bushost.yaml";
/// Environment variable pointing at a configuration file.
pub const CONFIG_ENV_VAR: &str = "BUSHOST_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BUSHOST";

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Connection settings for the message broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URI, e.g. `amqp://localhost:5672/vhost`.
    pub uri: String,
    /// Broker username.
    pub username: String,
    /// Broker password.
    pub password: String,
    /// Name of this application; seeds convention-based queue naming.
    pub application_name: String,
    /// Seconds to wait between failed connection attempts.
    pub connect_backoff_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "amqp://localhost:5672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            application_name: "app".to_string(),
            connect_backoff_secs: 1,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `bushost.yaml` in the current directory (if present)
    /// 2. File given by the `path` argument (if provided)
    /// 3. File named by `BUSHOST_CONFIG` (if set)
    /// 4. `BUSHOST__`-prefixed environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Config pointing at a local broker, for tests.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.uri, "amqp://localhost:5672");
        assert_eq!(config.application_name, "app");
        assert_eq!(config.connect_backoff_secs, 1);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: BrokerConfig =
            serde_yaml::from_str("uri: amqp://broker:5672\napplication_name: billing\n").unwrap();
        assert_eq!(config.uri, "amqp://broker:5672");
        assert_eq!(config.application_name, "billing");
        assert_eq!(config.username, "guest");
    }
}
