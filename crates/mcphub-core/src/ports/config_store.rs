//! Config persistence port.
//!
//! The manager saves through this port after every mutating command; the
//! binary provides the JSON file implementation. Load/save are quick local
//! operations by contract, so the port is synchronous.

use thiserror::Error;

use crate::settings::AppConfig;

/// Errors from the configuration store.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Failed to read config: {0}")]
    Read(String),

    #[error("Failed to write config: {0}")]
    Write(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Port for loading and persisting the application configuration.
pub trait ConfigStore: Send + Sync {
    /// Load the configuration, falling back to defaults when absent.
    fn load(&self) -> Result<AppConfig, ConfigStoreError>;

    /// Persist the configuration.
    fn save(&self, config: &AppConfig) -> Result<(), ConfigStoreError>;
}

/// Store that loads defaults and discards saves, for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct NoopConfigStore;

impl NoopConfigStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConfigStore for NoopConfigStore {
    fn load(&self) -> Result<AppConfig, ConfigStoreError> {
        Ok(AppConfig::default())
    }

    fn save(&self, _config: &AppConfig) -> Result<(), ConfigStoreError> {
        Ok(())
    }
}
