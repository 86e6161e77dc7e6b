//! MCP server configuration types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Wire form used to reach an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking JSON-RPC over stdin/stdout - mcphub spawns and
    /// owns the process.
    #[default]
    Stdio,
    /// Legacy SSE server - GET an event stream, POST requests to the endpoint
    /// the server announces.
    Sse,
    /// Streamable HTTP server - single endpoint, JSON or SSE responses.
    StreamableHttp,
}

impl TransportKind {
    /// True for the URL-based transports (SSE and streamable HTTP).
    #[must_use]
    pub const fn is_http_based(self) -> bool {
        matches!(self, Self::Sse | Self::StreamableHttp)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

/// User-declared configuration for one MCP server.
///
/// The `id` is stable for the lifetime of the entry; it is assigned on
/// creation and never regenerated by updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable unique id. Empty on creation requests; assigned by the manager.
    #[serde(default)]
    pub id: String,
    /// User-friendly display name.
    pub name: String,
    /// Transport used to reach the server.
    pub transport: TransportKind,
    /// Executable for stdio servers (e.g. "npx").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for stdio servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Extra environment variables for stdio servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// URL for the HTTP-based transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers for the HTTP-based transports (e.g. Authorization).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Whether the manager should connect this server.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tool names hidden from proxy-facing listings.
    #[serde(default)]
    pub disabled_tools: Vec<String>,
    /// Resource URIs hidden from proxy-facing listings.
    #[serde(default)]
    pub disabled_resources: Vec<String>,
}

const fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Create a stdio server configuration.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: Some(args),
            env: None,
            url: None,
            headers: None,
            enabled: true,
            disabled_tools: Vec::new(),
            disabled_resources: Vec::new(),
        }
    }

    /// Create a legacy SSE server configuration.
    #[must_use]
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            transport: TransportKind::Sse,
            command: None,
            args: None,
            env: None,
            url: Some(url.into()),
            headers: None,
            enabled: true,
            disabled_tools: Vec::new(),
            disabled_resources: Vec::new(),
        }
    }

    /// Create a streamable HTTP server configuration.
    #[must_use]
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::StreamableHttp,
            ..Self::sse(name, url)
        }
    }

    /// Assign a fresh id if none is set. Returns the effective id.
    pub fn ensure_id(&mut self) -> String {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.id.clone()
    }

    /// Validate the configuration against its declared transport.
    ///
    /// Rules: name non-empty; stdio requires a non-empty command; the
    /// HTTP-based transports require a well-formed URL.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Server name is required".to_string());
        }

        match self.transport {
            TransportKind::Stdio => {
                if self
                    .command
                    .as_deref()
                    .is_none_or(|c| c.trim().is_empty())
                {
                    return Err(format!(
                        "Server '{}': stdio transport requires a command",
                        self.name
                    ));
                }
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let raw = self.url.as_deref().unwrap_or_default();
                if raw.is_empty() {
                    return Err(format!(
                        "Server '{}': {} transport requires a URL",
                        self.name, self.transport
                    ));
                }
                if let Err(e) = url::Url::parse(raw) {
                    return Err(format!("Server '{}': invalid URL '{raw}': {e}", self.name));
                }
            }
        }

        Ok(())
    }

    /// True when `other` differs in any field the live transport depends on.
    ///
    /// Used to decide whether an update while connected forces a
    /// disconnect/reconnect cycle.
    #[must_use]
    pub fn transport_fields_changed(&self, other: &Self) -> bool {
        self.transport != other.transport
            || self.command != other.command
            || self.args != other.args
            || self.env != other.env
            || self.url != other.url
            || self.headers != other.headers
    }
}
