//! Per-server connection: lifecycle state, capability snapshot, and the
//! serialized operation lane.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use mcphub_core::{
    ConnectionState, ResourceDescriptor, ServerConfig, ServerDetail, ServerStatus, ToolDescriptor,
};

use crate::client::{ClientError, McpClient};
use crate::transport::TransportFactory;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("server is not connected")]
    NotConnected,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Mutable lifecycle data, guarded separately from the client lane so
/// status reads never wait behind a slow connect.
#[derive(Default)]
struct Runtime {
    state: ConnectionState,
    connected_at: Option<DateTime<Utc>>,
    last_ping: Option<DateTime<Utc>>,
    error_message: Option<String>,
    tools: Vec<ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
    reconnect_attempts: u32,
}

impl Runtime {
    fn clear_session(&mut self) {
        self.connected_at = None;
        self.last_ping = None;
        self.tools.clear();
        self.resources.clear();
    }
}

/// One managed MCP server.
///
/// All session-touching operations (connect, disconnect, ping, forward)
/// go through the `client` mutex, so operations on the same server are
/// serialized while different servers proceed independently.
pub struct Connection {
    id: String,
    config: RwLock<ServerConfig>,
    runtime: RwLock<Runtime>,
    client: Mutex<Option<McpClient>>,
}

impl Connection {
    /// `config.id` must already be assigned; it is immutable from here on.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            config: RwLock::new(config),
            runtime: RwLock::new(Runtime::default()),
            client: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn config(&self) -> ServerConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: ServerConfig) {
        *self.config.write().await = config;
    }

    pub async fn state(&self) -> ConnectionState {
        self.runtime.read().await.state
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.runtime.read().await.reconnect_attempts
    }

    /// Mark the start of an automatic reconnect attempt.
    pub async fn note_reconnecting(&self) -> u32 {
        let mut runtime = self.runtime.write().await;
        runtime.state = ConnectionState::Reconnecting;
        runtime.reconnect_attempts += 1;
        runtime.reconnect_attempts
    }

    /// Establish the session and snapshot the server's capabilities.
    ///
    /// Connecting an already connected server is a no-op. On failure the
    /// connection lands in `Error` with the cause recorded.
    pub async fn connect(
        &self,
        factory: &dyn TransportFactory,
        timeout_secs: u64,
    ) -> Result<(), ConnectionError> {
        let mut lane = self.client.lock().await;
        if lane.is_some() && self.runtime.read().await.state.is_connected() {
            debug!("already connected, nothing to do");
            return Ok(());
        }

        let config = self.config.read().await.clone();
        {
            let mut runtime = self.runtime.write().await;
            // A reconnect attempt stays visible as Reconnecting.
            if runtime.state != ConnectionState::Reconnecting {
                runtime.state = ConnectionState::Connecting;
            }
            runtime.error_message = None;
        }

        match Self::establish(&config, factory, timeout_secs).await {
            Ok((client, tools, resources)) => {
                info!(
                    server_name = %config.name,
                    tools = tools.len(),
                    resources = resources.len(),
                    "connected"
                );
                let now = Utc::now();
                let mut runtime = self.runtime.write().await;
                runtime.state = ConnectionState::Connected;
                runtime.connected_at = Some(now);
                runtime.last_ping = Some(now);
                runtime.error_message = None;
                runtime.tools = tools;
                runtime.resources = resources;
                runtime.reconnect_attempts = 0;
                *lane = Some(client);
                Ok(())
            }
            Err(e) => {
                warn!(server_name = %config.name, "connect failed: {e}");
                let mut runtime = self.runtime.write().await;
                runtime.state = ConnectionState::Error;
                runtime.error_message = Some(e.to_string());
                runtime.clear_session();
                *lane = None;
                Err(e.into())
            }
        }
    }

    async fn establish(
        config: &ServerConfig,
        factory: &dyn TransportFactory,
        timeout_secs: u64,
    ) -> Result<(McpClient, Vec<ToolDescriptor>, Vec<ResourceDescriptor>), ClientError> {
        let transport = factory.connect(config, timeout_secs).await?;
        let mut client = McpClient::initialize(transport, timeout_secs).await?;

        // Capability listing failures degrade to empty snapshots rather
        // than tearing the fresh session down.
        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server_name = %config.name, "tools/list failed: {e}");
                Vec::new()
            }
        };
        let resources = match client.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                warn!(server_name = %config.name, "resources/list failed: {e}");
                Vec::new()
            }
        };
        Ok((client, tools, resources))
    }

    /// Close the session and return to `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let mut lane = self.client.lock().await;
        if let Some(mut client) = lane.take() {
            client.close().await;
        }
        let mut runtime = self.runtime.write().await;
        runtime.state = ConnectionState::Disconnected;
        runtime.error_message = None;
        runtime.reconnect_attempts = 0;
        runtime.clear_session();
    }

    /// Liveness probe. A failed probe tears the session down and parks
    /// the connection in `Error`.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let mut lane = self.client.lock().await;
        let Some(client) = lane.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        match client.ping().await {
            Ok(()) => {
                self.runtime.write().await.last_ping = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                if let Some(mut client) = lane.take() {
                    client.close().await;
                }
                let mut runtime = self.runtime.write().await;
                runtime.state = ConnectionState::Error;
                runtime.error_message = Some(format!("health check failed: {e}"));
                runtime.clear_session();
                Err(e.into())
            }
        }
    }

    /// Forward a downstream JSON-RPC message to the server.
    ///
    /// Transport failures tear the session down; JSON-RPC error
    /// envelopes pass through untouched in the returned frame.
    pub async fn forward(&self, message: Value) -> Result<Option<Value>, ConnectionError> {
        let mut lane = self.client.lock().await;
        let Some(client) = lane.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        match client.forward(message).await {
            Ok(response) => Ok(response),
            Err(e @ ClientError::Transport(_)) => {
                if let Some(mut client) = lane.take() {
                    client.close().await;
                }
                let mut runtime = self.runtime.write().await;
                runtime.state = ConnectionState::Error;
                runtime.error_message = Some(e.to_string());
                runtime.clear_session();
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Point-in-time status projection.
    pub async fn status(&self, proxy_port: u16) -> ServerStatus {
        let config = self.config.read().await;
        let runtime = self.runtime.read().await;
        let uptime_seconds = runtime
            .connected_at
            .map(|t| u64::try_from((Utc::now() - t).num_seconds().max(0)).unwrap_or(0));
        let proxy_url = runtime
            .state
            .is_connected()
            .then(|| format!("http://localhost:{proxy_port}/mcp/{}", config.id));
        ServerStatus {
            id: config.id.clone(),
            name: config.name.clone(),
            state: runtime.state,
            transport: config.transport,
            connected_at: runtime.connected_at,
            last_ping: runtime.last_ping,
            error_message: runtime.error_message.clone(),
            tools_count: runtime.tools.len(),
            resources_count: runtime.resources.len(),
            uptime_seconds,
            proxy_url,
        }
    }

    /// Full view: config, status, and the capability snapshot.
    pub async fn detail(&self, proxy_port: u16) -> ServerDetail {
        let status = self.status(proxy_port).await;
        let config = self.config.read().await.clone();
        let runtime = self.runtime.read().await;
        ServerDetail {
            config,
            status,
            tools: runtime.tools.clone(),
            resources: runtime.resources.clone(),
        }
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.runtime.read().await.tools.clone()
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.runtime.read().await.resources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConnectOutcome, ScriptedFactory};

    fn stdio_config(id: &str) -> ServerConfig {
        let mut config = ServerConfig::stdio(id, "mcp-server", vec![]);
        config.id = id.to_string();
        config
    }

    #[tokio::test]
    async fn connect_populates_snapshot_and_status() {
        let factory = ScriptedFactory::new();
        factory.push("a", ConnectOutcome::healthy(&["echo", "add"]));
        let conn = Connection::new(stdio_config("a"));

        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        conn.connect(&factory, 5).await.unwrap();
        assert_eq!(conn.state().await, ConnectionState::Connected);

        let status = conn.status(3001).await;
        assert_eq!(status.tools_count, 2);
        assert!(status.connected_at.is_some());
        assert_eq!(
            status.proxy_url.as_deref(),
            Some("http://localhost:3001/mcp/a")
        );
    }

    #[tokio::test]
    async fn connect_when_connected_is_a_noop() {
        let factory = ScriptedFactory::new();
        let conn = Connection::new(stdio_config("a"));
        conn.connect(&factory, 5).await.unwrap();
        conn.connect(&factory, 5).await.unwrap();
        assert_eq!(factory.connect_count("a"), 1);
    }

    #[tokio::test]
    async fn failed_connect_lands_in_error_with_message() {
        let factory = ScriptedFactory::new();
        factory.push("a", ConnectOutcome::Fail("spawn refused".into()));
        let conn = Connection::new(stdio_config("a"));

        assert!(conn.connect(&factory, 5).await.is_err());
        let status = conn.status(3001).await;
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.error_message.unwrap().contains("spawn refused"));
        assert!(status.proxy_url.is_none());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_clears_snapshot() {
        let factory = ScriptedFactory::new();
        factory.push("a", ConnectOutcome::healthy(&["echo"]));
        let conn = Connection::new(stdio_config("a"));
        conn.connect(&factory, 5).await.unwrap();

        conn.disconnect().await;
        conn.disconnect().await;

        let status = conn.status(3001).await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.tools_count, 0);
        assert!(status.connected_at.is_none());
        assert!(status.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_ping_tears_the_session_down() {
        let factory = ScriptedFactory::new();
        // 2 live requests cover the connect-time listings only.
        factory.push("a", ConnectOutcome::HealthyThenDead { live_requests: 2 });
        let conn = Connection::new(stdio_config("a"));
        conn.connect(&factory, 5).await.unwrap();

        assert!(conn.ping().await.is_err());
        let status = conn.status(3001).await;
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.tools_count, 0);
        assert!(status.error_message.unwrap().contains("health check"));
    }

    #[tokio::test]
    async fn forward_requires_a_session() {
        let conn = Connection::new(stdio_config("a"));
        let err = conn
            .forward(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected));
    }
}
