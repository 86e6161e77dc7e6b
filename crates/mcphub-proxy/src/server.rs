//! Axum HTTP server exposing the managed servers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mcphub_conn::ConnectionManager;

use crate::error::ProxyError;
use crate::rpc::{self, RpcOutcome};

/// Shared application state for the proxy server.
#[derive(Clone)]
struct AppState {
    manager: Arc<ConnectionManager>,
}

/// Build the proxy router. Split from [`serve`] so tests can drive it
/// without binding a socket.
pub fn create_router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/mcps", get(list_servers))
        .route("/mcp/{id}/tools", get(list_tools))
        .route("/mcp/{id}/resources", get(list_resources))
        .route("/mcp/{id}/message", post(post_message))
        .route("/mcp/{id}", axum::routing::delete(delete_server))
        .with_state(AppState { manager })
}

/// Run the proxy on a pre-bound listener until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Proxy listening on {addr}");

    let app = create_router(manager);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Proxy server shut down");
    Ok(())
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let statuses = state.manager.list_statuses().await;
    let connected = statuses.iter().filter(|s| s.state.is_connected()).count();
    Json(json!({
        "status": "ok",
        "servers": statuses.len(),
        "connected": connected,
    }))
}

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    debug!("GET /mcps");
    Json(state.manager.list_statuses().await)
}

async fn list_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    debug!(server_id = %id, "GET tools");
    let tools = state.manager.server_tools(&id).await?;
    Ok(Json(json!({"tools": tools})))
}

async fn list_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    debug!(server_id = %id, "GET resources");
    let resources = state.manager.server_resources(&id).await?;
    Ok(Json(json!({"resources": resources})))
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, ProxyError> {
    debug!(server_id = %id, "POST message");
    match rpc::handle_message(&state.manager, &id, payload).await? {
        RpcOutcome::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
        RpcOutcome::Single(response) => Ok(Json(response).into_response()),
        RpcOutcome::Batch(responses) => Ok(Json(responses).into_response()),
    }
}

async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ProxyError> {
    info!(server_id = %id, "DELETE server");
    state.manager.remove_server(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
