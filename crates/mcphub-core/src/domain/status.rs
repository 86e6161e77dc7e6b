//! Connection state machine states and the read-only status projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::{ResourceDescriptor, ToolDescriptor};
use super::server::{ServerConfig, TransportKind};

/// State of one managed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport held. Initial state, and terminal on explicit disconnect.
    #[default]
    Disconnected,
    /// Transport open + initialize handshake in progress.
    Connecting,
    /// Handshake complete; capability snapshot valid; pings expected to pass.
    Connected,
    /// Last operation failed; holds an error message, no live transport.
    Error,
    /// Connecting again via the auto-reconnect path, counted against the
    /// attempt budget.
    Reconnecting,
}

impl ConnectionState {
    /// True while a connect attempt is in flight (either entry path).
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// True when the capability snapshot may be served.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Read-only snapshot of one connection for external consumers.
///
/// Recomputed on demand and on every state transition; never mutated
/// independently of the connection it projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    pub state: ConnectionState,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub tools_count: usize,
    pub resources_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    /// Base URL of this server's proxied endpoints; present only while
    /// Connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// Full detail for one server: configuration plus runtime view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDetail {
    pub config: ServerConfig,
    pub status: ServerStatus,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}
