//! Transport abstraction over the three MCP carriers.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use mcphub_core::ServerConfig;

pub mod http;
pub mod sse;
pub mod stdio;

/// Errors raised by a transport while moving JSON-RPC frames.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("transport channel closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFrame(err.to_string())
    }
}

/// Convert configured header strings into a reqwest header map.
pub(crate) fn build_headers(
    headers: Option<&std::collections::HashMap<String, String>>,
) -> Result<reqwest::header::HeaderMap, TransportError> {
    use reqwest::header::{HeaderName, HeaderValue};

    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers.into_iter().flatten() {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|e| TransportError::Handshake(format!("bad header name {key}: {e}")))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| TransportError::Handshake(format!("bad header value for {key}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// A bidirectional JSON-RPC carrier to one MCP server.
///
/// Implementations own whatever process, socket or session the carrier
/// needs and release it on [`Transport::close`] or drop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request frame and wait for the matching response frame.
    async fn request(&mut self, frame: Value) -> Result<Value, TransportError>;

    /// Send a notification frame; no response is expected.
    async fn notify(&mut self, frame: Value) -> Result<(), TransportError>;

    /// Tear the carrier down. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Builds transports from server configs.
///
/// A trait rather than a free function so tests can substitute scripted
/// transports without touching processes or the network.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        config: &ServerConfig,
        timeout_secs: u64,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Production factory dispatching on the configured transport kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(
        &self,
        config: &ServerConfig,
        timeout_secs: u64,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match config.transport {
            mcphub_core::TransportKind::Stdio => {
                let transport = stdio::StdioTransport::spawn(config).await?;
                Ok(Box::new(transport))
            }
            mcphub_core::TransportKind::Sse => {
                let transport = sse::SseTransport::connect(config, timeout_secs).await?;
                Ok(Box::new(transport))
            }
            mcphub_core::TransportKind::StreamableHttp => {
                let transport = http::StreamableHttpTransport::connect(config, timeout_secs)?;
                Ok(Box::new(transport))
            }
        }
    }
}
