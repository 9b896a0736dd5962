//! Configuration types

use crate::error::{ConfigError, QueryCellResult};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`RegistryConfig::name`].
pub const ENV_REGISTRY_NAME: &str = "QUERYCELL_REGISTRY_NAME";
/// Environment variable overriding [`RegistryConfig::eager_poll`].
pub const ENV_EAGER_POLL: &str = "QUERYCELL_EAGER_POLL";
/// Environment variable overriding [`RegistryConfig::spawn_driver`].
pub const ENV_SPAWN_DRIVER: &str = "QUERYCELL_SPAWN_DRIVER";

/// Configuration shared by a registry and every result it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Label attached to log events emitted by the registry.
    pub name: String,
    /// Poll a freshly started operation once before `run` returns, so
    /// producers that are already ready complete synchronously.
    pub eager_poll: bool,
    /// Spawn a driver task on the current tokio runtime (when there is one)
    /// so started operations complete even if nobody awaits them.
    pub spawn_driver: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            eager_poll: true,
            spawn_driver: true,
        }
    }
}

impl RegistryConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the process environment, falling back to defaults
    /// for unset or unparsable variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            name: lookup(ENV_REGISTRY_NAME).unwrap_or(defaults.name),
            eager_poll: lookup(ENV_EAGER_POLL)
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.eager_poll),
            spawn_driver: lookup(ENV_SPAWN_DRIVER)
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.spawn_driver),
        }
    }

    /// Set the registry name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable the synchronous first poll.
    pub fn with_eager_poll(mut self, enabled: bool) -> Self {
        self.eager_poll = enabled;
        self
    }

    /// Enable or disable spawning driver tasks.
    pub fn with_spawn_driver(mut self, enabled: bool) -> Self {
        self.spawn_driver = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - name is not empty
    /// - name contains no whitespace
    pub fn validate(&self) -> QueryCellResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        if self.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "must not contain whitespace".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
