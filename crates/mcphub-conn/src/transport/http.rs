//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is a POST to the server URL. The server may
//! answer with plain JSON or with a short SSE body carrying the response
//! frame. Session affinity rides the `Mcp-Session-Id` header: captured
//! from the first response that sets it, replayed on every later request,
//! and released with a DELETE on close.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use mcphub_core::ServerConfig;

use super::{Transport, TransportError, build_headers};
use crate::protocol::parse_sse_event;

const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: Option<String>,
    timeout_secs: u64,
}

impl StreamableHttpTransport {
    pub fn connect(config: &ServerConfig, timeout_secs: u64) -> Result<Self, TransportError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| TransportError::Handshake("no url configured".into()))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            headers: build_headers(config.headers.as_ref())?,
            session_id: None,
            timeout_secs,
        })
    }

    async fn post(&mut self, frame: &Value) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header("Accept", "application/json, text/event-stream")
            .json(frame);
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session) {
                debug!(session_id = %session, "captured mcp session");
                self.session_id = Some(session.to_string());
            }
        }

        response
            .error_for_status()
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

/// Extract the response frame from a JSON or SSE body.
fn parse_response_body(content_type: &str, body: &str) -> Result<Value, TransportError> {
    if content_type.starts_with("text/event-stream") {
        for block in body.split("\n\n") {
            if let Some(event) = parse_sse_event(block) {
                if !event.data.is_empty() {
                    return Ok(serde_json::from_str(&event.data)?);
                }
            }
        }
        return Err(TransportError::InvalidFrame(
            "sse body carried no data event".into(),
        ));
    }
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&mut self, frame: Value) -> Result<Value, TransportError> {
        let response = self.post(&frame).await?;
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = tokio::time::timeout(Duration::from_secs(self.timeout_secs), response.text())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout_secs))??;
        parse_response_body(&content_type, &body)
    }

    async fn notify(&mut self, frame: Value) -> Result<(), TransportError> {
        // Notifications typically get 202 Accepted with an empty body.
        self.post(&frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(session) = self.session_id.take() else {
            return Ok(());
        };
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, &session)
            .send()
            .await;
        match result {
            Ok(response) => {
                let status = response.status();
                // Servers that do not support explicit session teardown
                // answer 404, 405 or 400; the session dies with them.
                if !status.is_success()
                    && !matches!(
                        status,
                        StatusCode::NOT_FOUND
                            | StatusCode::METHOD_NOT_ALLOWED
                            | StatusCode::BAD_REQUEST
                    )
                {
                    warn!(%status, "session delete rejected");
                }
            }
            Err(e) => debug!("session delete failed: {e}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_parses_directly() {
        let frame =
            parse_response_body("application/json", r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
                .unwrap();
        assert_eq!(frame["id"], 1);
    }

    #[test]
    fn sse_body_yields_first_data_frame() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        let frame = parse_response_body("text/event-stream; charset=utf-8", body).unwrap();
        assert_eq!(frame["id"], 7);
    }

    #[test]
    fn empty_sse_body_is_an_error() {
        assert!(parse_response_body("text/event-stream", ": ping\n\n").is_err());
    }
}
