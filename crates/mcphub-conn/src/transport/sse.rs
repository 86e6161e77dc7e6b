//! Legacy HTTP+SSE transport.
//!
//! The server keeps one long-lived SSE stream open. Its first `endpoint`
//! event names the URL requests are POSTed to; responses come back as
//! `message` events on the stream and are routed to waiters by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mcphub_core::ServerConfig;

use super::{Transport, TransportError, build_headers};
use crate::protocol::parse_sse_event;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    pending: PendingMap,
    reader: JoinHandle<()>,
    timeout_secs: u64,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` handshake.
    pub async fn connect(config: &ServerConfig, timeout_secs: u64) -> Result<Self, TransportError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| TransportError::Handshake("no url configured".into()))?;
        let headers = build_headers(config.headers.as_ref())?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let response = client
            .get(url)
            .headers(headers.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // First event on the stream must name the message endpoint.
        let endpoint = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            loop {
                let chunk = stream
                    .next()
                    .await
                    .ok_or(TransportError::Closed)?
                    .map_err(TransportError::from)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find("\n\n") {
                    let block = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    if let Some(event) = parse_sse_event(&block) {
                        if event.event.as_deref() == Some("endpoint") {
                            return Ok::<_, TransportError>(resolve_endpoint(url, &event.data)?);
                        }
                    }
                }
            }
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout_secs))??;

        debug!(%endpoint, "sse endpoint handshake complete");

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find("\n\n") {
                    let block = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    let Some(event) = parse_sse_event(&block) else {
                        continue;
                    };
                    route_event(&reader_pending, &event.data).await;
                }
            }
            // Stream closed; wake everyone so waits fail fast.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            client,
            endpoint,
            headers,
            pending,
            reader,
            timeout_secs,
        })
    }
}

async fn route_event(pending: &PendingMap, data: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(data) else {
        warn!("skipping unparseable sse frame");
        return;
    };
    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        debug!("ignoring server-initiated frame");
        return;
    };
    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(frame);
    }
}

/// Resolve the endpoint path from the handshake against the stream URL.
fn resolve_endpoint(base: &str, path: &str) -> Result<String, TransportError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    let base_url = url::Url::parse(base)
        .map_err(|e| TransportError::Handshake(format!("bad base url: {e}")))?;
    base_url
        .join(path)
        .map(String::from)
        .map_err(|e| TransportError::Handshake(format!("bad endpoint path: {e}")))
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&mut self, frame: Value) -> Result<Value, TransportError> {
        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::InvalidFrame("request frame has no id".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let result = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&frame)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(e) = result {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout(self.timeout_secs))
            }
        }
    }

    async fn notify(&mut self, frame: Value) -> Result<(), TransportError> {
        self.client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&frame)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.abort();
        self.pending.lock().await.clear();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution() {
        let absolute = resolve_endpoint("http://localhost:8080/sse", "https://other/messages");
        assert_eq!(absolute.unwrap(), "https://other/messages");

        let relative =
            resolve_endpoint("http://localhost:8080/sse", "/messages?sessionId=abc").unwrap();
        assert_eq!(relative, "http://localhost:8080/messages?sessionId=abc");
    }

    #[test]
    fn header_building_rejects_bad_names() {
        let mut headers = HashMap::new();
        headers.insert("bad name".to_string(), "value".to_string());
        assert!(build_headers(Some(&headers)).is_err());
    }
}
