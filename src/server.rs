//! HTTP surface: health probe, tool catalog, tool dispatch.
//!
//! Tool calls always answer 200 with a `{success, data | error}` body;
//! only malformed JSON ever surfaces as a transport-level error.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::AppState;
use crate::tools::{self, ToolResponse};

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Resolve the listen port: CLI flag, then env, then the default.
pub fn resolve_port(cli: Option<u16>) -> u16 {
    if let Some(p) = cli {
        return p;
    }
    for k in ["INBOX_SCOUT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return p;
            }
        }
    }
    5000
}

/// Bind and serve until a shutdown signal arrives, then close the browser.
pub async fn run(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/INBOX_SCOUT_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("🚀 tool server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("🛑 shutdown signal received");
    state.bot.shutdown().await;
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.bot.status();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "inbox-scout",
        "version": env!("CARGO_PKG_VERSION"),
        "bot": status,
    }))
}

async fn list_tools(State(_state): State<Arc<AppState>>) -> Json<Value> {
    let tools: Vec<Value> = tools::tool_catalog()
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "title": t.title,
                "description": t.description,
                "inputSchema": t.input_schema,
            })
        })
        .collect();
    Json(serde_json::json!({ "tools": tools }))
}

async fn call_tool_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> Json<ToolResponse> {
    Json(tools::call_tool(&state, &request.name, &request.arguments).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_arguments_default_to_null() {
        let req: ToolCallRequest = serde_json::from_str(r#"{"name":"get_bot_status"}"#).unwrap();
        assert_eq!(req.name, "get_bot_status");
        assert!(req.arguments.is_null());
    }

    #[test]
    fn cli_port_wins_over_the_default() {
        assert_eq!(resolve_port(Some(8123)), 8123);
    }
}
