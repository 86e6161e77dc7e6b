//! JSON-RPC handling for the message endpoint.
//!
//! The proxy answers `initialize` itself so every downstream client gets
//! a session regardless of upstream state history, swallows the matching
//! `notifications/initialized`, blocks calls to disabled items, and
//! forwards everything else verbatim.

use serde_json::{Value, json};

use mcphub_conn::{ConnectionManager, ManagerError};
use mcphub_conn::protocol::{CODE_METHOD_NOT_FOUND, PROTOCOL_VERSION};

use crate::error::ProxyError;

/// JSON-RPC error code for upstream failures surfaced in an envelope.
const CODE_UPSTREAM_ERROR: i64 = -32000;

/// Result of handling one message-endpoint request body.
#[derive(Debug, PartialEq, Eq)]
pub enum RpcOutcome {
    /// Notification(s) only; reply 202 with no body.
    Accepted,
    /// One response frame.
    Single(Value),
    /// Response frames for the requests in a batch.
    Batch(Vec<Value>),
}

/// Handle a message-endpoint body, single frame or batch.
pub async fn handle_message(
    manager: &ConnectionManager,
    server_id: &str,
    payload: Value,
) -> Result<RpcOutcome, ProxyError> {
    // Resolves the id up front and gives us the disabled-item lists.
    let config = manager.get_detail(server_id).await.map_err(ProxyError::from)?.config;

    match payload {
        Value::Array(batch) => {
            if batch.is_empty() {
                return Err(ProxyError::BadRequest("empty batch".into()));
            }
            let mut responses = Vec::new();
            for message in batch {
                if let Some(response) =
                    process_one(manager, server_id, &config.disabled_tools, &config.disabled_resources, message).await?
                {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                Ok(RpcOutcome::Accepted)
            } else {
                Ok(RpcOutcome::Batch(responses))
            }
        }
        message @ Value::Object(_) => {
            match process_one(
                manager,
                server_id,
                &config.disabled_tools,
                &config.disabled_resources,
                message,
            )
            .await?
            {
                Some(response) => Ok(RpcOutcome::Single(response)),
                None => Ok(RpcOutcome::Accepted),
            }
        }
        _ => Err(ProxyError::BadRequest(
            "body must be a JSON-RPC object or batch array".into(),
        )),
    }
}

async fn process_one(
    manager: &ConnectionManager,
    server_id: &str,
    disabled_tools: &[String],
    disabled_resources: &[String],
    message: Value,
) -> Result<Option<Value>, ProxyError> {
    let Some(obj) = message.as_object() else {
        return Err(ProxyError::BadRequest("batch entries must be objects".into()));
    };
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::BadRequest("message has no method".into()))?
        .to_string();
    let id = obj.get("id").cloned();

    // The proxy session is local; the upstream one was initialized when
    // the manager connected.
    if method == "initialize" {
        return Ok(Some(local_initialize_response(id.unwrap_or(Value::Null))));
    }
    if method == "notifications/initialized" {
        return Ok(None);
    }

    if method == "tools/call" {
        if let Some(name) = obj
            .get("params")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
        {
            if disabled_tools.iter().any(|t| t == name) {
                return Ok(Some(error_envelope(
                    id.unwrap_or(Value::Null),
                    CODE_METHOD_NOT_FOUND,
                    &format!("Tool '{name}' is disabled"),
                )));
            }
        }
    }
    if method == "resources/read" {
        if let Some(uri) = obj
            .get("params")
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
        {
            if disabled_resources.iter().any(|r| r == uri) {
                return Ok(Some(error_envelope(
                    id.unwrap_or(Value::Null),
                    CODE_METHOD_NOT_FOUND,
                    &format!("Resource '{uri}' is disabled"),
                )));
            }
        }
    }

    match manager.forward_message(server_id, message).await {
        Ok(mut response) => {
            if let Some(frame) = response.as_mut() {
                match method.as_str() {
                    "tools/list" => filter_listing(frame, "tools", "name", disabled_tools),
                    "resources/list" => {
                        filter_listing(frame, "resources", "uri", disabled_resources);
                    }
                    _ => {}
                }
            }
            Ok(response)
        }
        // Upstream trouble on a request becomes a JSON-RPC error envelope
        // so batch siblings still get their answers.
        Err(ManagerError::Transport(msg) | ManagerError::Protocol(msg)) => {
            if let Some(id) = id {
                Ok(Some(error_envelope(id, CODE_UPSTREAM_ERROR, &msg)))
            } else {
                Err(ProxyError::Upstream(msg))
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Drop disabled entries from a forwarded listing result in place.
fn filter_listing(frame: &mut Value, list_key: &str, item_key: &str, disabled: &[String]) {
    if let Some(items) = frame
        .get_mut("result")
        .and_then(|r| r.get_mut(list_key))
        .and_then(Value::as_array_mut)
    {
        items.retain(|item| {
            item.get(item_key)
                .and_then(Value::as_str)
                .is_none_or(|key| !disabled.iter().any(|d| d == key))
        });
    }
}

fn local_initialize_response(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}, "resources": {}},
            "serverInfo": {
                "name": "mcphub",
                "version": env!("CARGO_PKG_VERSION"),
            }
        }
    })
}

fn error_envelope(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
}
