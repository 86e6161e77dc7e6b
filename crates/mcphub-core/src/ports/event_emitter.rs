//! Event emitter trait for cross-crate event broadcasting.
//!
//! Implementations handle transport details (channels, GUI bridges, SSE);
//! the manager only sees this trait.

use crate::events::AppEvent;

/// Trait for emitting application events.
///
/// Implementations must not block: the manager calls this from its
/// operation and health-check paths.
pub trait AppEventEmitter: Send + Sync {
    /// Emit an application event.
    fn emit(&self, event: AppEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn AppEventEmitter>;
}

/// Emitter that discards all events, for tests and headless contexts
/// without a listener.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AppEventEmitter for NoopEmitter {
    fn emit(&self, _event: AppEvent) {}

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn noop_emitter_accepts_events() {
        let emitter: Arc<dyn AppEventEmitter> = Arc::new(NoopEmitter::new());
        emitter.emit(AppEvent::statuses_changed(Vec::new()));
        let _boxed = emitter.clone_box();
    }
}
