//! MCP client session over an established transport.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use mcphub_core::{ResourceDescriptor, ToolDescriptor};

use crate::protocol::{
    CODE_METHOD_NOT_FOUND, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    initialize_params,
};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ClientError {
    fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == CODE_METHOD_NOT_FOUND)
    }
}

/// One initialized session with a remote MCP server.
pub struct McpClient {
    transport: Box<dyn Transport>,
    next_id: u64,
    timeout: Duration,
    init: InitializeResult,
}

impl McpClient {
    /// Run the MCP handshake: `initialize` then `notifications/initialized`.
    pub async fn initialize(
        mut transport: Box<dyn Transport>,
        timeout_secs: u64,
    ) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(timeout_secs);
        let request = JsonRpcRequest::new(1, "initialize", Some(initialize_params()));
        let frame = serde_json::to_value(&request).map_err(TransportError::from)?;

        let response = tokio::time::timeout(timeout, transport.request(frame))
            .await
            .map_err(|_| TransportError::Timeout(timeout_secs))??;
        let result = parse_response(response)?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("bad initialize result: {e}")))?;

        debug!(
            server = %init.server_info.name,
            protocol = %init.protocol_version,
            "mcp handshake complete"
        );

        let note = JsonRpcNotification::new("notifications/initialized", None);
        let frame = serde_json::to_value(&note).map_err(TransportError::from)?;
        transport.notify(frame).await?;

        Ok(Self {
            transport,
            next_id: 2,
            timeout,
            init,
        })
    }

    pub const fn server_info(&self) -> &InitializeResult {
        &self.init
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let request = JsonRpcRequest::new(self.take_id(), method, params);
        let frame = serde_json::to_value(&request).map_err(TransportError::from)?;
        let response = tokio::time::timeout(self.timeout, self.transport.request(frame))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_secs()))??;
        parse_response(response)
    }

    /// `tools/list`. A server without the tools capability yields an
    /// empty list instead of failing the session.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, ClientError> {
        match self.call("tools/list", None).await {
            Ok(result) => {
                let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
                serde_json::from_value(tools)
                    .map_err(|e| ClientError::Protocol(format!("bad tools/list result: {e}")))
            }
            Err(e) if e.is_method_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// `resources/list`, with the same tolerance as tool listing.
    pub async fn list_resources(&mut self) -> Result<Vec<ResourceDescriptor>, ClientError> {
        match self.call("resources/list", None).await {
            Ok(result) => {
                let resources = result
                    .get("resources")
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                serde_json::from_value(resources)
                    .map_err(|e| ClientError::Protocol(format!("bad resources/list result: {e}")))
            }
            Err(e) if e.is_method_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Liveness probe. Servers predating the `ping` method get probed
    /// with `tools/list` instead.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.call("ping", None).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_method_not_found() => {
                debug!("ping unsupported, probing with tools/list");
                self.call("tools/list", None).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Forward an arbitrary JSON-RPC message from a downstream client.
    ///
    /// Requests get a fresh internal id on the wire and the caller's id
    /// back on the response; notifications (no id) return `None`.
    pub async fn forward(&mut self, mut message: Value) -> Result<Option<Value>, ClientError> {
        let caller_id = message.get("id").cloned();
        let Some(caller_id) = caller_id else {
            self.transport.notify(message).await?;
            return Ok(None);
        };

        let wire_id = self.take_id();
        if let Some(obj) = message.as_object_mut() {
            obj.insert("id".to_string(), json!(wire_id));
        }

        let mut response = tokio::time::timeout(self.timeout, self.transport.request(message))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_secs()))??;
        if let Some(obj) = response.as_object_mut() {
            obj.insert("id".to_string(), caller_id);
        }
        Ok(Some(response))
    }

    /// Tear the transport down.
    pub async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            warn!("transport close failed: {e}");
        }
    }
}

fn parse_response(frame: Value) -> Result<Value, ClientError> {
    let response: JsonRpcResponse = serde_json::from_value(frame)
        .map_err(|e| ClientError::Protocol(format!("bad response frame: {e}")))?;
    if let Some(error) = response.error {
        return Err(ClientError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response
        .result
        .ok_or_else(|| ClientError::Protocol("response carried neither result nor error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[tokio::test]
    async fn handshake_then_listing() {
        let transport = ScriptedTransport::healthy_server("srv", &["echo"], &[]);
        let mut client = McpClient::initialize(Box::new(transport), 5).await.unwrap();
        assert_eq!(client.server_info().server_info.name, "srv");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let resources = client.list_resources().await.unwrap();
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn listing_tolerates_method_not_found() {
        let mut transport = ScriptedTransport::initialize_only("bare");
        transport.push_error(CODE_METHOD_NOT_FOUND, "Method not found");
        let mut client = McpClient::initialize(Box::new(transport), 5).await.unwrap();
        assert!(client.list_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ping_falls_back_to_tools_list() {
        let mut transport = ScriptedTransport::initialize_only("old");
        transport.push_error(CODE_METHOD_NOT_FOUND, "Method not found");
        transport.push_result(json!({"tools": []}));
        let mut client = McpClient::initialize(Box::new(transport), 5).await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn forward_restores_caller_id() {
        let mut transport = ScriptedTransport::initialize_only("srv");
        transport.push_result(json!({"content": []}));
        let mut client = McpClient::initialize(Box::new(transport), 5).await.unwrap();

        let response = client
            .forward(json!({"jsonrpc": "2.0", "id": "ext-42", "method": "tools/call"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["id"], "ext-42");
    }

    #[tokio::test]
    async fn forward_notification_returns_none() {
        let transport = ScriptedTransport::initialize_only("srv");
        let mut client = McpClient::initialize(Box::new(transport), 5).await.unwrap();
        let response = client
            .forward(json!({"jsonrpc": "2.0", "method": "notifications/progress"}))
            .await
            .unwrap();
        assert!(response.is_none());
    }
}
