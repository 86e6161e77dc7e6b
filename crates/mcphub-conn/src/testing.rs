//! Scripted transports and factories for exercising connection logic
//! without real processes or network endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use mcphub_core::ServerConfig;

use crate::transport::{Transport, TransportError, TransportFactory};

#[derive(Debug, Clone)]
enum Script {
    Result(Value),
    Error { code: i64, message: String },
}

/// In-memory transport that answers `initialize` and capability listings
/// from a canned description, with an override queue for everything else.
pub struct ScriptedTransport {
    server_name: String,
    tools: Vec<String>,
    resources: Vec<String>,
    scripted: VecDeque<Script>,
    /// Non-initialize requests answered before the transport goes dead.
    /// `None` means it never dies.
    live_requests: Option<usize>,
    pub sent: Vec<Value>,
    pub closed: bool,
}

impl ScriptedTransport {
    #[must_use]
    pub fn initialize_only(server_name: &str) -> Self {
        Self::healthy_server(server_name, &[], &[])
    }

    #[must_use]
    pub fn healthy_server(server_name: &str, tools: &[&str], resources: &[&str]) -> Self {
        Self {
            server_name: server_name.to_string(),
            tools: tools.iter().map(ToString::to_string).collect(),
            resources: resources.iter().map(ToString::to_string).collect(),
            scripted: VecDeque::new(),
            live_requests: None,
            sent: Vec::new(),
            closed: false,
        }
    }

    /// Healthy handshake and listings, then every later request fails as
    /// if the server process died.
    #[must_use]
    pub fn healthy_then_dead(server_name: &str, live_requests: usize) -> Self {
        let mut transport = Self::initialize_only(server_name);
        transport.live_requests = Some(live_requests);
        transport
    }

    pub fn push_result(&mut self, result: Value) {
        self.scripted.push_back(Script::Result(result));
    }

    pub fn push_error(&mut self, code: i64, message: &str) {
        self.scripted.push_back(Script::Error {
            code,
            message: message.to_string(),
        });
    }

    fn default_result(&self, method: &str) -> Value {
        match method {
            "initialize" => json!({
                "protocolVersion": "2025-03-26",
                "serverInfo": {"name": self.server_name, "version": "0.0.1"},
                "capabilities": {"tools": {}, "resources": {}}
            }),
            "tools/list" => json!({
                "tools": self.tools.iter().map(|name| json!({
                    "name": name,
                    "description": format!("{name} tool"),
                    "inputSchema": {"type": "object"}
                })).collect::<Vec<_>>()
            }),
            "resources/list" => json!({
                "resources": self.resources.iter().map(|uri| json!({
                    "uri": uri,
                    "name": uri,
                })).collect::<Vec<_>>()
            }),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&mut self, frame: Value) -> Result<Value, TransportError> {
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.sent.push(frame);

        if method != "initialize" {
            if let Some(live) = &mut self.live_requests {
                if *live == 0 {
                    return Err(TransportError::Closed);
                }
                *live -= 1;
            }
            if let Some(script) = self.scripted.pop_front() {
                return Ok(match script {
                    Script::Result(result) => {
                        json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    Script::Error { code, message } => {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                    }
                });
            }
        }

        let result = self.default_result(&method);
        Ok(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }

    async fn notify(&mut self, frame: Value) -> Result<(), TransportError> {
        self.sent.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

/// One scripted connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Healthy {
        tools: Vec<String>,
        resources: Vec<String>,
    },
    /// Connect succeeds, then the transport dies after answering the
    /// given number of post-handshake requests.
    HealthyThenDead { live_requests: usize },
    Fail(String),
}

impl ConnectOutcome {
    #[must_use]
    pub fn healthy(tools: &[&str]) -> Self {
        Self::Healthy {
            tools: tools.iter().map(ToString::to_string).collect(),
            resources: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ServerScript {
    queue: VecDeque<ConnectOutcome>,
    fallback: Option<ConnectOutcome>,
    connects: usize,
}

/// Factory handing out scripted transports keyed by server id.
///
/// Unscripted servers connect healthy with no capabilities.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, ServerScript>>,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one outcome for the next connect of `id`.
    pub fn push(&self, id: &str, outcome: ConnectOutcome) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(id.to_string()).or_default().queue.push_back(outcome);
    }

    /// Outcome used whenever the queue for `id` is empty.
    pub fn set_fallback(&self, id: &str, outcome: ConnectOutcome) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(id.to_string()).or_default().fallback = Some(outcome);
    }

    /// How many times `id` has been connected.
    #[must_use]
    pub fn connect_count(&self, id: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .get(id)
            .map_or(0, |script| script.connects)
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn connect(
        &self,
        config: &ServerConfig,
        _timeout_secs: u64,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(config.id.clone()).or_default();
            script.connects += 1;
            script
                .queue
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(ConnectOutcome::Healthy {
                    tools: Vec::new(),
                    resources: Vec::new(),
                })
        };

        match outcome {
            ConnectOutcome::Healthy { tools, resources } => {
                let tools: Vec<&str> = tools.iter().map(String::as_str).collect();
                let resources: Vec<&str> = resources.iter().map(String::as_str).collect();
                Ok(Box::new(ScriptedTransport::healthy_server(
                    &config.name,
                    &tools,
                    &resources,
                )))
            }
            ConnectOutcome::HealthyThenDead { live_requests } => Ok(Box::new(
                ScriptedTransport::healthy_then_dead(&config.name, live_requests),
            )),
            ConnectOutcome::Fail(message) => Err(TransportError::Spawn(message)),
        }
    }
}
