//! Ports (traits) implemented by adapters: event emission, config
//! persistence, and log capture.

mod config_store;
mod event_emitter;
mod log_sink;

pub use config_store::{ConfigStore, ConfigStoreError, NoopConfigStore};
pub use event_emitter::{AppEventEmitter, NoopEmitter};
pub use log_sink::{LogEntry, LogLevel, LogSink, NoopLogSink};
