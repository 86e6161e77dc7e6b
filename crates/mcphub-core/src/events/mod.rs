//! Canonical event union for all cross-adapter notifications.
//!
//! Events are serialized with a `type` tag so GUI shells can discriminate
//! them without bespoke parsing:
//!
//! ```json
//! { "type": "statuses_changed", "statuses": [ ... ] }
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::ServerStatus;

/// Events emitted by the connection manager.
///
/// Status changes are always emitted as a single batch carrying the full
/// current list, never one event per connection. Multiple connections
/// settling at once (e.g. at startup) therefore produce one notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// The aggregated status list changed.
    StatusesChanged { statuses: Vec<ServerStatus> },
}

impl AppEvent {
    /// Create a statuses-changed event.
    #[must_use]
    pub const fn statuses_changed(statuses: Vec<ServerStatus>) -> Self {
        Self::StatusesChanged { statuses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_type_tag() {
        let event = AppEvent::statuses_changed(Vec::new());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "statuses_changed");
        assert!(json["statuses"].as_array().unwrap().is_empty());
    }
}
