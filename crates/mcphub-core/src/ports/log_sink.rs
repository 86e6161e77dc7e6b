//! Log sink port for diagnostic event capture.
//!
//! The sink's retention policy (cap, eviction) belongs to the
//! implementation, not to the callers appending entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a captured diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Warn,
    Error,
}

/// One diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Component that produced the entry (e.g. "manager", "proxy").
    pub target: String,
    pub message: String,
}

impl LogEntry {
    /// Create an entry timestamped now.
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Port for appending diagnostic entries to a sink.
///
/// Implementations must be thread-safe and non-blocking.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopLogSink;

impl NoopLogSink {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LogSink for NoopLogSink {
    fn append(&self, _entry: LogEntry) {}
}
