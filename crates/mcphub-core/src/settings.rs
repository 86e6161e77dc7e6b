//! Global settings and validation.
//!
//! The config file is owned by the external config store; this module only
//! defines its shape and the rules the manager enforces before applying it.

use serde::{Deserialize, Serialize};

use crate::domain::ServerConfig;

/// Default port for the HTTP proxy.
pub const DEFAULT_PROXY_PORT: u16 = 3001;

/// Lowest port the proxy may bind (unprivileged range).
pub const MIN_PROXY_PORT: u16 = 1024;

/// Default health-check interval.
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Minimum accepted health-check interval.
pub const MIN_HEALTH_INTERVAL_SECS: u64 = 5;

/// Default reconnect attempt ceiling.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default per-operation transport timeout.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Application-level configuration consumed by the manager and proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_attempts: u32,
    /// Timeout applied to every transport operation (open, ping, send).
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

const fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

const fn default_health_interval() -> u64 {
    DEFAULT_HEALTH_INTERVAL_SECS
}

const fn default_max_reconnect() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

const fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxy_port: DEFAULT_PROXY_PORT,
            health_check_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            servers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Validate global fields and every contained server config.
    pub fn validate(&self) -> Result<(), String> {
        if self.proxy_port < MIN_PROXY_PORT {
            return Err(format!("Proxy port must be >= {MIN_PROXY_PORT}"));
        }
        if self.health_check_interval_secs < MIN_HEALTH_INTERVAL_SECS {
            return Err(format!(
                "Health check interval must be >= {MIN_HEALTH_INTERVAL_SECS} seconds"
            ));
        }
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(format!("Server '{}' has no id", server.name));
            }
            server.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_privileged_proxy_port() {
        let config = AppConfig {
            proxy_port: 80,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_health_interval() {
        let config = AppConfig {
            health_check_interval_secs: 1,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_embedded_server_without_id() {
        let config = AppConfig {
            servers: vec![ServerConfig::stdio("files", "echo", vec![])],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_all_fields_defaulted() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.proxy_port, DEFAULT_PROXY_PORT);
        assert!(config.auto_reconnect);
        assert!(config.servers.is_empty());
    }
}
