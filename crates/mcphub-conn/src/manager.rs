//! Connection manager: registry of managed servers, lifecycle commands,
//! the periodic health loop, and batched status broadcasting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcphub_core::{
    AppConfig, AppEvent, AppEventEmitter, ConfigStore, ConnectionState, ResourceDescriptor,
    ServerConfig, ServerDetail, ServerStatus, ToolDescriptor,
};

use crate::client::ClientError;
use crate::connection::{Connection, ConnectionError};
use crate::transport::TransportFactory;

/// Reconnect backoff ceiling.
const MAX_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{0}")]
    Validation(String),

    #[error("server not found: {0}")]
    NotFound(String),

    #[error("server '{0}' is not connected")]
    NotConnected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ManagerError {
    fn from_connection(id: &str, err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotConnected => Self::NotConnected(id.to_string()),
            ConnectionError::Client(ClientError::Transport(e)) => Self::Transport(e.to_string()),
            ConnectionError::Client(e) => Self::Protocol(e.to_string()),
        }
    }
}

/// Owns every [`Connection`] and applies lifecycle commands to them.
///
/// The registry is a vector so status listings keep insertion order.
/// Commands on different servers run independently; commands on the same
/// server serialize on that connection's operation lane.
pub struct ConnectionManager {
    connections: RwLock<Vec<Arc<Connection>>>,
    settings: RwLock<AppConfig>,
    factory: Arc<dyn TransportFactory>,
    emitter: Box<dyn AppEventEmitter>,
    store: Box<dyn ConfigStore>,
    /// Earliest wall-clock time the next reconnect of each server may run.
    retry_gate: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Fingerprint of the last broadcast, to suppress no-change batches.
    last_broadcast: Mutex<Option<Vec<ServerStatus>>>,
}

/// Status list with the continuously-advancing fields blanked, so the
/// periodic sweep stays quiet while nothing observable changed. Every
/// other field participates: a rename or a proxy port change is a real
/// change and must reach subscribers.
fn broadcast_fingerprint(statuses: &[ServerStatus]) -> Vec<ServerStatus> {
    statuses
        .iter()
        .map(|status| {
            let mut status = status.clone();
            status.uptime_seconds = None;
            status.last_ping = None;
            status
        })
        .collect()
}

impl ConnectionManager {
    /// Build the registry from a loaded configuration. No connections are
    /// opened yet; call [`Self::initialize`] for that.
    #[must_use]
    pub fn new(
        mut config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        emitter: Box<dyn AppEventEmitter>,
        store: Box<dyn ConfigStore>,
    ) -> Self {
        let connections = config
            .servers
            .drain(..)
            .map(|mut server| {
                server.ensure_id();
                Arc::new(Connection::new(server))
            })
            .collect();
        Self {
            connections: RwLock::new(connections),
            settings: RwLock::new(config),
            factory,
            emitter,
            store,
            retry_gate: Mutex::new(HashMap::new()),
            last_broadcast: Mutex::new(None),
        }
    }

    /// Connect every enabled server concurrently and broadcast the result.
    pub async fn initialize(&self) {
        let timeout = self.connection_timeout().await;
        let conns = self.snapshot().await;
        let attempts = conns.into_iter().map(|conn| {
            let factory = Arc::clone(&self.factory);
            async move {
                if conn.config().await.enabled {
                    if let Err(e) = conn.connect(factory.as_ref(), timeout).await {
                        warn!(server_id = %conn.id(), "startup connect failed: {e}");
                    }
                }
            }
        });
        join_all(attempts).await;
        self.publish_statuses().await;
    }

    async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.clone()
    }

    async fn find(&self, id: &str) -> Result<Arc<Connection>, ManagerError> {
        self.connections
            .read()
            .await
            .iter()
            .find(|conn| conn.id() == id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    async fn proxy_port(&self) -> u16 {
        self.settings.read().await.proxy_port
    }

    async fn connection_timeout(&self) -> u64 {
        self.settings.read().await.connection_timeout_secs
    }

    /// Register a new server. An enabled server gets an immediate connect
    /// attempt; its outcome lands in the returned status rather than
    /// failing the registration.
    pub async fn add_server(&self, mut config: ServerConfig) -> Result<ServerStatus, ManagerError> {
        config.validate().map_err(ManagerError::Validation)?;
        let id = config.ensure_id();

        let enabled = config.enabled;
        let name = config.name.clone();
        let conn = Arc::new(Connection::new(config));

        // Existence check and insert under one guard, so two concurrent
        // adds carrying the same id cannot both slip in.
        {
            let mut conns = self.connections.write().await;
            if conns.iter().any(|conn| conn.id() == id) {
                return Err(ManagerError::Validation(format!(
                    "server id '{id}' already exists"
                )));
            }
            conns.push(Arc::clone(&conn));
        }
        info!(server_id = %id, server_name = %name, "server added");

        if enabled {
            let timeout = self.connection_timeout().await;
            if let Err(e) = conn.connect(self.factory.as_ref(), timeout).await {
                warn!(server_id = %id, "initial connect failed: {e}");
            }
        }

        self.persist().await;
        self.publish_statuses().await;
        Ok(conn.status(self.proxy_port().await).await)
    }

    /// Replace a server's configuration.
    ///
    /// Changing a transport-relevant field of a connected server recycles
    /// the session; renames and toggle changes apply in place.
    pub async fn update_server(&self, config: ServerConfig) -> Result<ServerStatus, ManagerError> {
        if config.id.is_empty() {
            return Err(ManagerError::Validation("server id is required".into()));
        }
        config.validate().map_err(ManagerError::Validation)?;

        let conn = self.find(&config.id).await?;
        let old = conn.config().await;
        let was_up = conn.state().await.is_connected();
        let needs_recycle = old.transport_fields_changed(&config);
        let newly_enabled = config.enabled && !old.enabled;
        conn.set_config(config.clone()).await;

        if !config.enabled {
            conn.disconnect().await;
        } else if (needs_recycle && was_up) || newly_enabled {
            conn.disconnect().await;
            let timeout = self.connection_timeout().await;
            if let Err(e) = conn.connect(self.factory.as_ref(), timeout).await {
                warn!(server_id = %config.id, "reconnect after update failed: {e}");
            }
        }

        self.persist().await;
        self.publish_statuses().await;
        Ok(conn.status(self.proxy_port().await).await)
    }

    /// Disconnect and forget a server.
    pub async fn remove_server(&self, id: &str) -> Result<(), ManagerError> {
        let conn = {
            let mut conns = self.connections.write().await;
            let index = conns
                .iter()
                .position(|conn| conn.id() == id)
                .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
            conns.remove(index)
        };
        conn.disconnect().await;
        self.retry_gate.lock().await.remove(id);
        info!(server_id = %id, "server removed");
        self.persist().await;
        self.publish_statuses().await;
        Ok(())
    }

    pub async fn connect_server(&self, id: &str) -> Result<ServerStatus, ManagerError> {
        let conn = self.find(id).await?;
        let timeout = self.connection_timeout().await;
        let result = conn.connect(self.factory.as_ref(), timeout).await;
        self.publish_statuses().await;
        result.map_err(|e| ManagerError::from_connection(id, e))?;
        Ok(conn.status(self.proxy_port().await).await)
    }

    pub async fn disconnect_server(&self, id: &str) -> Result<(), ManagerError> {
        let conn = self.find(id).await?;
        conn.disconnect().await;
        self.retry_gate.lock().await.remove(id);
        self.publish_statuses().await;
        Ok(())
    }

    /// Statuses of every server, in registration order.
    pub async fn list_statuses(&self) -> Vec<ServerStatus> {
        let port = self.proxy_port().await;
        let conns = self.snapshot().await;
        let mut statuses = Vec::with_capacity(conns.len());
        for conn in conns {
            statuses.push(conn.status(port).await);
        }
        statuses
    }

    pub async fn get_detail(&self, id: &str) -> Result<ServerDetail, ManagerError> {
        let conn = self.find(id).await?;
        Ok(conn.detail(self.proxy_port().await).await)
    }

    /// Proxy base URL for one server; `None` unless it is connected.
    pub async fn proxy_url(&self, id: &str) -> Result<Option<String>, ManagerError> {
        let conn = self.find(id).await?;
        Ok(conn.status(self.proxy_port().await).await.proxy_url)
    }

    /// Tools of a connected server, with disabled entries filtered out.
    pub async fn server_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>, ManagerError> {
        let conn = self.find(id).await?;
        if !conn.state().await.is_connected() {
            return Err(ManagerError::NotConnected(id.to_string()));
        }
        let disabled = conn.config().await.disabled_tools;
        Ok(conn
            .tools()
            .await
            .into_iter()
            .filter(|tool| !disabled.contains(&tool.name))
            .collect())
    }

    /// Resources of a connected server, with disabled entries filtered out.
    pub async fn server_resources(
        &self,
        id: &str,
    ) -> Result<Vec<ResourceDescriptor>, ManagerError> {
        let conn = self.find(id).await?;
        if !conn.state().await.is_connected() {
            return Err(ManagerError::NotConnected(id.to_string()));
        }
        let disabled = conn.config().await.disabled_resources;
        Ok(conn
            .resources()
            .await
            .into_iter()
            .filter(|resource| !disabled.contains(&resource.uri))
            .collect())
    }

    /// Update which tools and resources a server exposes through the proxy.
    pub async fn set_disabled_items(
        &self,
        id: &str,
        disabled_tools: Vec<String>,
        disabled_resources: Vec<String>,
    ) -> Result<(), ManagerError> {
        let conn = self.find(id).await?;
        let mut config = conn.config().await;
        config.disabled_tools = disabled_tools;
        config.disabled_resources = disabled_resources;
        conn.set_config(config).await;
        self.persist().await;
        Ok(())
    }

    /// Forward one downstream JSON-RPC message to a connected server.
    /// `None` means the message was a notification.
    pub async fn forward_message(
        &self,
        id: &str,
        message: Value,
    ) -> Result<Option<Value>, ManagerError> {
        let conn = self.find(id).await?;
        let result = conn.forward(message).await;
        if result.is_err() {
            // A transport failure may have torn the session down.
            self.publish_statuses().await;
        }
        result.map_err(|e| ManagerError::from_connection(id, e))
    }

    /// Current configuration: settings plus the live server list.
    pub async fn current_config(&self) -> AppConfig {
        let mut config = self.settings.read().await.clone();
        let conns = self.snapshot().await;
        config.servers = Vec::with_capacity(conns.len());
        for conn in &conns {
            config.servers.push(conn.config().await);
        }
        config
    }

    /// Apply new global settings. The embedded server list is ignored;
    /// servers are managed through their own commands.
    pub async fn update_settings(&self, mut new: AppConfig) -> Result<(), ManagerError> {
        new.servers.clear();
        new.validate().map_err(ManagerError::Validation)?;
        {
            let mut settings = self.settings.write().await;
            new.servers = std::mem::take(&mut settings.servers);
            *settings = new;
        }
        self.persist().await;
        // A proxy port change rewrites every connected server's proxy_url.
        self.publish_statuses().await;
        Ok(())
    }

    /// One health pass: ping connected servers, retry errored ones that
    /// still have reconnect budget, then broadcast.
    ///
    /// Explicitly disconnected servers are left alone; only `Error` is an
    /// auto-reconnect trigger. Retries back off exponentially from the
    /// health interval, capped at [`MAX_BACKOFF_SECS`].
    pub async fn health_check_cycle(&self) {
        let (auto_reconnect, max_attempts, timeout, interval) = {
            let settings = self.settings.read().await;
            (
                settings.auto_reconnect,
                settings.max_reconnect_attempts,
                settings.connection_timeout_secs,
                settings.health_check_interval_secs,
            )
        };

        let mut errored = Vec::new();
        let mut pings = Vec::new();
        for conn in self.snapshot().await {
            match conn.state().await {
                ConnectionState::Connected => pings.push(conn),
                ConnectionState::Error if auto_reconnect => errored.push(conn),
                _ => {}
            }
        }

        // Pings run concurrently; one slow server must not starve the rest.
        join_all(pings.iter().map(|conn| async move {
            if let Err(e) = conn.ping().await {
                warn!(server_id = %conn.id(), "health check failed: {e}");
            }
        }))
        .await;

        // A ping failure queues its reconnect attempt in this same pass.
        if auto_reconnect {
            for conn in pings {
                if conn.state().await == ConnectionState::Error {
                    errored.push(conn);
                }
            }
        }

        for conn in &errored {
            self.try_reconnect(conn, max_attempts, timeout, interval)
                .await;
        }

        self.publish_statuses().await;
    }

    async fn try_reconnect(
        &self,
        conn: &Arc<Connection>,
        max_attempts: u32,
        timeout: u64,
        interval: u64,
    ) {
        let attempts = conn.reconnect_attempts().await;
        if attempts >= max_attempts {
            return;
        }

        let now = Utc::now();
        if let Some(at) = self.retry_gate.lock().await.get(conn.id()) {
            if *at > now {
                return;
            }
        }

        let attempt = conn.note_reconnecting().await;
        info!(
            server_id = %conn.id(),
            attempt,
            max_attempts,
            "attempting reconnect"
        );
        match conn.connect(self.factory.as_ref(), timeout).await {
            Ok(()) => {
                self.retry_gate.lock().await.remove(conn.id());
            }
            Err(e) => {
                let exponent = attempt.min(16);
                let backoff = interval
                    .saturating_mul(1_u64 << exponent)
                    .min(MAX_BACKOFF_SECS);
                debug!(server_id = %conn.id(), backoff, "reconnect failed: {e}");
                self.retry_gate.lock().await.insert(
                    conn.id().to_string(),
                    now + chrono::Duration::seconds(i64::try_from(backoff).unwrap_or(i64::MAX)),
                );
            }
        }
    }

    /// Emit the status batch if anything observable changed since the
    /// last broadcast.
    pub async fn publish_statuses(&self) {
        let statuses = self.list_statuses().await;
        let fingerprint = broadcast_fingerprint(&statuses);
        let mut last = self.last_broadcast.lock().await;
        if last.as_ref() != Some(&fingerprint) {
            *last = Some(fingerprint);
            self.emitter.emit(AppEvent::statuses_changed(statuses));
        }
    }

    /// Disconnect everything and persist the final configuration.
    pub async fn shutdown(&self) {
        info!("shutting down connections");
        let conns = self.snapshot().await;
        join_all(conns.iter().map(|conn| conn.disconnect())).await;
        self.persist().await;
    }

    async fn persist(&self) {
        let config = self.current_config().await;
        if let Err(e) = self.store.save(&config) {
            warn!("failed to persist config: {e}");
        }
    }
}

/// Spawn the background loop: a health pass every configured interval and
/// a status broadcast sweep every two seconds, until cancelled.
///
/// The health interval is re-read after every pass, so a settings update
/// takes effect from the next tick on.
pub fn start_health_loop(
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval_secs = {
            let settings = manager.settings.read().await;
            settings.health_check_interval_secs
        };
        let mut next_health = Instant::now() + Duration::from_secs(interval_secs);
        let mut status_tick = tokio::time::interval(Duration::from_secs(2));
        status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs, "health loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("health loop stopped");
                    break;
                }
                () = tokio::time::sleep_until(next_health) => {
                    manager.health_check_cycle().await;
                    let interval_secs = {
                        let settings = manager.settings.read().await;
                        settings.health_check_interval_secs
                    };
                    next_health = Instant::now() + Duration::from_secs(interval_secs);
                }
                _ = status_tick.tick() => {
                    manager.publish_statuses().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::testing::{ConnectOutcome, ScriptedFactory};
    use mcphub_core::NoopConfigStore;

    #[derive(Clone, Default)]
    struct RecordingEmitter {
        events: Arc<StdMutex<Vec<AppEvent>>>,
    }

    impl AppEventEmitter for RecordingEmitter {
        fn emit(&self, event: AppEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn clone_box(&self) -> Box<dyn AppEventEmitter> {
            Box::new(self.clone())
        }
    }

    impl RecordingEmitter {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }

        fn last_statuses(&self) -> Vec<ServerStatus> {
            match self.events.lock().unwrap().last() {
                Some(AppEvent::StatusesChanged { statuses }) => statuses.clone(),
                None => Vec::new(),
            }
        }
    }

    fn stdio_config(name: &str) -> ServerConfig {
        ServerConfig::stdio(name, "mcp-server", vec![])
    }

    fn make_manager(factory: Arc<ScriptedFactory>) -> (ConnectionManager, RecordingEmitter) {
        let emitter = RecordingEmitter::default();
        let manager = ConnectionManager::new(
            AppConfig::default(),
            factory,
            emitter.clone_box(),
            Box::new(NoopConfigStore::new()),
        );
        (manager, emitter)
    }

    #[tokio::test]
    async fn add_rejects_invalid_config() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let mut config = stdio_config("bad");
        config.command = None;
        let err = manager.add_server(config).await.unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
        assert!(manager.list_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn add_assigns_id_and_connects_enabled_server() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let status = manager.add_server(stdio_config("files")).await.unwrap();
        assert!(!status.id.is_empty());
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(factory.connect_count(&status.id), 1);
    }

    #[tokio::test]
    async fn disabled_server_is_registered_but_not_connected() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut config = stdio_config("paused");
        config.enabled = false;
        let status = manager.add_server(config).await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(factory.connect_count(&status.id), 0);
    }

    #[tokio::test]
    async fn startup_connects_enabled_servers_in_one_batch() {
        let factory = Arc::new(ScriptedFactory::new());
        let emitter = RecordingEmitter::default();

        let mut config = AppConfig::default();
        config
            .servers
            .push(ServerConfig::stdio("files", "mcp-server", vec![]));
        let mut paused = ServerConfig::stdio("paused", "mcp-server", vec![]);
        paused.enabled = false;
        config.servers.push(paused);

        let manager = ConnectionManager::new(
            config,
            factory.clone(),
            emitter.clone_box(),
            Box::new(NoopConfigStore::new()),
        );
        manager.initialize().await;

        let statuses = manager.list_statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].state, ConnectionState::Connected);
        assert_eq!(statuses[1].state, ConnectionState::Disconnected);
        assert_eq!(factory.connect_count(&statuses[0].id), 1);
        assert_eq!(factory.connect_count(&statuses[1].id), 0);
        assert_eq!(emitter.count(), 1);
    }

    #[tokio::test]
    async fn statuses_keep_registration_order() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        for name in ["alpha", "beta", "gamma"] {
            manager.add_server(stdio_config(name)).await.unwrap();
        }
        let names: Vec<String> = manager
            .list_statuses()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let status = manager.add_server(stdio_config("files")).await.unwrap();

        let mut dup = stdio_config("other");
        dup.id = status.id;
        let err = manager.add_server(dup).await.unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_adds_with_one_id_register_once() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let manager = Arc::new(manager);

        let mut first = stdio_config("first");
        first.id = "shared".to_string();
        let mut second = stdio_config("second");
        second.id = "shared".to_string();

        let m1 = Arc::clone(&manager);
        let m2 = Arc::clone(&manager);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { m1.add_server(first).await }),
            tokio::spawn(async move { m2.add_server(second).await }),
        );

        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(manager.list_statuses().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_forgets_the_server() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let status = manager.add_server(stdio_config("files")).await.unwrap();

        manager.remove_server(&status.id).await.unwrap();
        assert!(manager.list_statuses().await.is_empty());
        assert!(matches!(
            manager.get_detail(&status.id).await.unwrap_err(),
            ManagerError::NotFound(_)
        ));
        assert!(matches!(
            manager.remove_server(&status.id).await.unwrap_err(),
            ManagerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn reconnect_budget_is_exhausted_then_terminal() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut config = stdio_config("flaky");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;
        factory.set_fallback(&id, ConnectOutcome::Fail("connection refused".into()));

        assert!(manager.connect_server(&id).await.is_err());
        assert_eq!(factory.connect_count(&id), 1);

        let max = manager.settings.read().await.max_reconnect_attempts;
        for _ in 0..max + 3 {
            // Collapse the backoff window so every cycle may retry.
            manager.retry_gate.lock().await.clear();
            manager.health_check_cycle().await;
        }

        // One manual attempt plus the full reconnect budget, then no more.
        assert_eq!(factory.connect_count(&id), 1 + max as usize);
        let status = manager.get_detail(&id).await.unwrap().status;
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.error_message.is_some());
    }

    #[tokio::test]
    async fn reconnect_succeeds_and_resets_budget() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut config = stdio_config("flaky");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;

        factory.push(&id, ConnectOutcome::Fail("connection refused".into()));
        assert!(manager.connect_server(&id).await.is_err());

        factory.push(&id, ConnectOutcome::healthy(&["echo"]));
        manager.retry_gate.lock().await.clear();
        manager.health_check_cycle().await;

        let status = manager.get_detail(&id).await.unwrap().status;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.tools_count, 1);

        let conn = manager.find(&id).await.unwrap();
        assert_eq!(conn.reconnect_attempts().await, 0);
    }

    #[tokio::test]
    async fn disconnected_servers_are_not_auto_reconnected() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let id = manager.add_server(stdio_config("files")).await.unwrap().id;
        manager.disconnect_server(&id).await.unwrap();
        assert_eq!(factory.connect_count(&id), 1);

        manager.health_check_cycle().await;
        manager.health_check_cycle().await;
        assert_eq!(factory.connect_count(&id), 1);
        assert_eq!(
            manager.get_detail(&id).await.unwrap().status.state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn failed_ping_reconnects_within_the_same_cycle() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut config = stdio_config("dying");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;

        // Connect-time listings use the two live requests; the first
        // health ping then fails and the cycle reconnects on the spot.
        factory.push(&id, ConnectOutcome::HealthyThenDead { live_requests: 2 });
        factory.push(&id, ConnectOutcome::healthy(&[]));
        manager.connect_server(&id).await.unwrap();

        manager.health_check_cycle().await;
        let status = manager.get_detail(&id).await.unwrap().status;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(factory.connect_count(&id), 2);
    }

    #[tokio::test]
    async fn operations_on_distinct_ids_interleave() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut a = stdio_config("a");
        a.enabled = false;
        let a = manager.add_server(a).await.unwrap().id;
        let b = manager.add_server(stdio_config("b")).await.unwrap().id;

        let (connect_a, disconnect_b) =
            tokio::join!(manager.connect_server(&a), manager.disconnect_server(&b));
        connect_a.unwrap();
        disconnect_b.unwrap();

        assert_eq!(
            manager.get_detail(&a).await.unwrap().status.state,
            ConnectionState::Connected
        );
        assert_eq!(
            manager.get_detail(&b).await.unwrap().status.state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn transport_field_update_recycles_the_session() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let id = manager.add_server(stdio_config("files")).await.unwrap().id;
        let mut config = manager.get_detail(&id).await.unwrap().config;
        config.args = Some(vec!["--verbose".to_string()]);
        manager.update_server(config).await.unwrap();
        assert_eq!(factory.connect_count(&id), 2);

        // A rename alone leaves the session untouched.
        let mut config = manager.get_detail(&id).await.unwrap().config;
        config.name = "renamed".to_string();
        let status = manager.update_server(config).await.unwrap();
        assert_eq!(status.name, "renamed");
        assert_eq!(factory.connect_count(&id), 2);
    }

    #[tokio::test]
    async fn disabling_via_update_disconnects() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let id = manager.add_server(stdio_config("files")).await.unwrap().id;
        let mut config = manager.get_detail(&id).await.unwrap().config;
        config.enabled = false;
        let status = manager.update_server(config).await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disabled_tools_are_filtered_from_listings() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));

        let mut config = stdio_config("files");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;
        factory.push(&id, ConnectOutcome::healthy(&["read", "write", "delete"]));
        manager.connect_server(&id).await.unwrap();

        manager
            .set_disabled_items(&id, vec!["delete".to_string()], vec![])
            .await
            .unwrap();

        let tools: Vec<String> = manager
            .server_tools(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(tools, ["read", "write"]);

        // The full detail still carries everything.
        assert_eq!(manager.get_detail(&id).await.unwrap().tools.len(), 3);
    }

    #[tokio::test]
    async fn listings_and_forward_require_connection() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let mut config = stdio_config("files");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;

        assert!(matches!(
            manager.server_tools(&id).await.unwrap_err(),
            ManagerError::NotConnected(_)
        ));
        assert!(matches!(
            manager
                .forward_message(&id, serde_json::json!({"id": 1, "method": "ping"}))
                .await
                .unwrap_err(),
            ManagerError::NotConnected(_)
        ));
    }

    #[tokio::test]
    async fn status_broadcasts_are_deduplicated() {
        let (manager, emitter) = make_manager(Arc::new(ScriptedFactory::new()));
        manager.add_server(stdio_config("files")).await.unwrap();
        let after_add = emitter.count();
        assert!(after_add >= 1);

        manager.publish_statuses().await;
        manager.publish_statuses().await;
        assert_eq!(emitter.count(), after_add);
    }

    #[tokio::test]
    async fn rename_and_port_changes_reach_subscribers() {
        let (manager, emitter) = make_manager(Arc::new(ScriptedFactory::new()));
        let id = manager.add_server(stdio_config("files")).await.unwrap().id;
        let before = emitter.count();

        let mut config = manager.get_detail(&id).await.unwrap().config;
        config.name = "renamed".to_string();
        manager.update_server(config).await.unwrap();
        assert_eq!(emitter.count(), before + 1);
        assert_eq!(emitter.last_statuses()[0].name, "renamed");

        let settings = AppConfig {
            proxy_port: 4200,
            ..AppConfig::default()
        };
        manager.update_settings(settings).await.unwrap();
        assert_eq!(emitter.count(), before + 2);
        let url = emitter.last_statuses()[0].proxy_url.clone().unwrap();
        assert!(url.contains(":4200/"));
    }

    #[tokio::test]
    async fn settings_update_is_validated_and_keeps_servers() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        manager.add_server(stdio_config("files")).await.unwrap();

        let bad = AppConfig {
            proxy_port: 80,
            ..AppConfig::default()
        };
        assert!(matches!(
            manager.update_settings(bad).await.unwrap_err(),
            ManagerError::Validation(_)
        ));

        let good = AppConfig {
            proxy_port: 4200,
            ..AppConfig::default()
        };
        manager.update_settings(good).await.unwrap();
        let config = manager.current_config().await;
        assert_eq!(config.proxy_port, 4200);
        assert_eq!(config.servers.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        manager.add_server(stdio_config("a")).await.unwrap();
        manager.add_server(stdio_config("b")).await.unwrap();

        manager.shutdown().await;
        for status in manager.list_statuses().await {
            assert_eq!(status.state, ConnectionState::Disconnected);
        }
    }

    #[tokio::test]
    async fn health_loop_stops_on_cancel() {
        let (manager, _) = make_manager(Arc::new(ScriptedFactory::new()));
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let handle = start_health_loop(Arc::clone(&manager), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_applies_from_the_next_tick() {
        let factory = Arc::new(ScriptedFactory::new());
        let (manager, _) = make_manager(Arc::clone(&factory));
        let manager = Arc::new(manager);

        // Every health cycle sees one failed ping and one reconnect, so
        // the connect count tracks how many cycles have run.
        let mut config = stdio_config("flappy");
        config.enabled = false;
        let id = manager.add_server(config).await.unwrap().id;
        factory.set_fallback(&id, ConnectOutcome::HealthyThenDead { live_requests: 2 });
        manager.connect_server(&id).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = start_health_loop(Arc::clone(&manager), cancel.clone());

        // Default 30s interval: two cycles inside 70 virtual seconds.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(factory.connect_count(&id), 3);

        let slow = AppConfig {
            health_check_interval_secs: 3600,
            ..AppConfig::default()
        };
        manager.update_settings(slow).await.unwrap();

        // The tick already scheduled under the old interval may still
        // fire once; everything after it runs on the new interval.
        tokio::time::sleep(Duration::from_secs(40)).await;
        let settled = factory.connect_count(&id);
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(factory.connect_count(&id), settled);

        cancel.cancel();
        handle.await.unwrap();
    }
}
