//! JSON file implementation of the config store port.

use std::path::PathBuf;

use mcphub_core::{AppConfig, ConfigStore, ConfigStoreError};

/// Persists the application config as pretty-printed JSON.
///
/// A missing file loads as defaults; saves go through a temp file and
/// rename so a crash mid-write never truncates the config.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Platform config location: `<config dir>/mcphub/config.json`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("no config directory available on this platform"))?;
        Ok(base.join("mcphub").join("config.json"))
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<AppConfig, ConfigStoreError> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| ConfigStoreError::Read(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| ConfigStoreError::Parse(e.to_string()))
    }

    fn save(&self, config: &AppConfig) -> Result<(), ConfigStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigStoreError::Write(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigStoreError::Parse(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| ConfigStoreError::Write(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ConfigStoreError::Write(e.to_string()))?;
        Ok(())
    }
}
