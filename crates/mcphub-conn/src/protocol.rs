//! JSON-RPC 2.0 framing for the MCP protocol.
//!
//! All three transports exchange these frames; only the byte carrier
//! differs.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// MCP protocol revision spoken by the client side.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC error code for an unknown method.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: params.unwrap_or_else(|| json!({})),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// `initialize` result returned by the remote server.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: RemoteServerInfo,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// Remote server identity from `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Capability flags from `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// The params this client sends with `initialize`.
#[must_use]
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": "mcphub",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {}
    })
}

/// One parsed Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse one SSE event block (the text between two blank lines).
///
/// Returns `None` for comment-only or empty blocks.
#[must_use]
pub fn parse_sse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = String::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim());
        }
        // id:/retry:/comment lines are ignored
    }

    if data.is_empty() && event.is_none() {
        return None;
    }
    Some(SseEvent { event, data })
}
