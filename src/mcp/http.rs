use crate::mcp::server::McpServer;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;

pub fn router(server: McpServer) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health))
        .with_state(server)
}

async fn health(State(server): State<McpServer>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": server.app().tool_executor.tool_names(),
        "log_counters": server.app().logger.stats(),
    }))
}

/// One JSON-RPC message per POST. Notifications get `202 Accepted`. The body
/// is parsed by the server so malformed JSON gets a `-32700` reply, as on
/// stdio.
async fn mcp_handler(State(server): State<McpServer>, body: Bytes) -> (StatusCode, Json<Value>) {
    tracing::debug!(bytes = body.len(), "mcp http: incoming request");

    match server.handle_message(&body).await {
        Some(response) => {
            let body = serde_json::to_value(&response).unwrap_or(Value::Null);
            (StatusCode::OK, Json(body))
        }
        None => (StatusCode::ACCEPTED, Json(json!({}))),
    }
}

pub async fn serve(addr: SocketAddr, server: McpServer) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "api-registry listening on http");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable, waiting for ctrl-c");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received");
}
