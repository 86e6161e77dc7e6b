//! Core domain types and port definitions for mcphub.
//!
//! This crate has no process or network I/O. It defines the server
//! configuration model, the connection status projection exposed to
//! external consumers, global settings, the cross-adapter event union,
//! and the ports (traits) implemented by adapters.

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    ConnectionState, ResourceDescriptor, ServerConfig, ServerDetail, ServerStatus, ToolDescriptor,
    TransportKind,
};
pub use events::AppEvent;
pub use ports::{
    AppEventEmitter, ConfigStore, ConfigStoreError, LogEntry, LogLevel, LogSink, NoopConfigStore,
    NoopEmitter, NoopLogSink,
};
pub use settings::{
    AppConfig, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_HEALTH_INTERVAL_SECS,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PROXY_PORT, MIN_HEALTH_INTERVAL_SECS, MIN_PROXY_PORT,
};
