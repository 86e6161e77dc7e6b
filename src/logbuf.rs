//! In-memory ring buffer for warnings and errors, fed by a tracing layer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use mcphub_core::{LogEntry, LogLevel, LogSink};

/// Capped FIFO of recent diagnostic entries.
pub struct RingLogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RingLogSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl LogSink for RingLogSink {
    fn append(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }
}

/// Tracing layer forwarding WARN and ERROR events into a [`LogSink`].
pub struct CaptureLayer {
    sink: Arc<dyn LogSink>,
}

impl CaptureLayer {
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = match *metadata.level() {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            _ => return,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink
            .append(LogEntry::new(level, metadata.target(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let sink = RingLogSink::new(2);
        sink.append(LogEntry::new(LogLevel::Warn, "t", "one"));
        sink.append(LogEntry::new(LogLevel::Warn, "t", "two"));
        sink.append(LogEntry::new(LogLevel::Error, "t", "three"));

        let entries = sink.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "two");
        assert_eq!(entries[1].message, "three");
    }

    #[test]
    fn capture_layer_keeps_warnings_only() {
        use tracing_subscriber::layer::SubscriberExt;

        let sink = Arc::new(RingLogSink::new(8));
        let subscriber =
            tracing_subscriber::registry().with(CaptureLayer::new(Arc::clone(&sink) as _));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("not captured");
            tracing::warn!("watch out");
            tracing::error!("broken");
        });

        let entries = sink.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert!(entries[1].message.contains("broken"));
    }
}
