//! Tool-call surface: named operations with JSON arguments.
//!
//! Every call returns a structured `{success, data | error}` envelope —
//! a failing tool is a successful HTTP response carrying `success: false`,
//! never a transport error. The orchestration layer on the other side of
//! this boundary matches on the envelope, not on status codes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::core::AppState;

#[derive(Clone, Debug)]
pub struct ToolCatalogEntry {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_catalog() -> Vec<ToolCatalogEntry> {
    vec![
        ToolCatalogEntry {
            name: "fetch_history",
            title: "Fetch History",
            description: "Log in, open a conversation and extract its full visible history.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["conversation_id"]
            }),
        },
        ToolCatalogEntry {
            name: "listen_live",
            title: "Listen Live",
            description: "Watch a conversation for incoming messages for a bounded duration.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {"type": "string"},
                    "duration": {"type": "integer", "minimum": 1, "maximum": 3600, "default": 60}
                },
                "required": ["conversation_id"]
            }),
        },
        ToolCatalogEntry {
            name: "send_message",
            title: "Send Message",
            description: "Type and send one message into a conversation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["conversation_id", "message"]
            }),
        },
        ToolCatalogEntry {
            name: "get_conversations",
            title: "Get Conversations",
            description: "List known conversations from the persisted history, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
        },
        ToolCatalogEntry {
            name: "search_messages",
            title: "Search Messages",
            description: "Case-insensitive text search over the persisted history.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "conversation_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["query"]
            }),
        },
        ToolCatalogEntry {
            name: "get_bot_status",
            title: "Get Bot Status",
            description: "Lifecycle state, login state and store statistics.",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolCatalogEntry {
            name: "get_job_listings",
            title: "Get Job Listings",
            description: "Fetch internship listings from the external batch-scraping service.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "default": "internship"},
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
        },
    ]
}

/// The envelope every tool call resolves to.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Dispatch one tool call by name. Unknown names are a structured failure
/// like any other.
pub async fn call_tool(state: &AppState, name: &str, arguments: &Value) -> ToolResponse {
    info!("tool call: {}", name);
    match name {
        "fetch_history" => fetch_history(state, arguments).await,
        "listen_live" => listen_live(state, arguments).await,
        "send_message" => send_message(state, arguments).await,
        "get_conversations" => get_conversations(state, arguments),
        "search_messages" => search_messages(state, arguments),
        "get_bot_status" => get_bot_status(state),
        "get_job_listings" => get_job_listings(state, arguments).await,
        other => ToolResponse::fail(format!("unknown tool '{}'", other)),
    }
}

async fn fetch_history(state: &AppState, args: &Value) -> ToolResponse {
    let Some(conversation_id) = required_str(args, "conversation_id") else {
        return missing("conversation_id");
    };
    let limit = opt_usize(args, "limit");

    match state.bot.fetch_history(conversation_id, limit).await {
        Ok(messages) => ToolResponse::ok(json!({
            "conversationId": conversation_id,
            "count": messages.len(),
            "messages": messages,
        })),
        Err(e) => {
            error!("fetch_history tool error: {:#}", e);
            ToolResponse::fail(format!("{:#}", e))
        }
    }
}

async fn listen_live(state: &AppState, args: &Value) -> ToolResponse {
    let Some(conversation_id) = required_str(args, "conversation_id") else {
        return missing("conversation_id");
    };
    let secs = args
        .get("duration")
        .and_then(|v| v.as_u64())
        .unwrap_or(60)
        .clamp(1, 3600);

    match state
        .bot
        .listen_live(conversation_id, Some(Duration::from_secs(secs)))
        .await
    {
        Ok(new_messages) => ToolResponse::ok(json!({
            "conversationId": conversation_id,
            "durationSecs": secs,
            "newCount": new_messages.len(),
            "messages": new_messages,
        })),
        Err(e) => {
            error!("listen_live tool error: {:#}", e);
            ToolResponse::fail(format!("{:#}", e))
        }
    }
}

async fn send_message(state: &AppState, args: &Value) -> ToolResponse {
    let Some(conversation_id) = required_str(args, "conversation_id") else {
        return missing("conversation_id");
    };
    let Some(message) = required_str(args, "message") else {
        return missing("message");
    };

    match state.bot.send_message(conversation_id, message).await {
        Ok(echo) => ToolResponse::ok(json!({
            "conversationId": conversation_id,
            "sent": echo,
        })),
        Err(e) => {
            error!("send_message tool error: {:#}", e);
            ToolResponse::fail(format!("{:#}", e))
        }
    }
}

fn get_conversations(state: &AppState, args: &Value) -> ToolResponse {
    let limit = opt_usize(args, "limit");
    let rows = state.bot.conversations(limit);
    ToolResponse::ok(json!({
        "count": rows.len(),
        "conversations": rows,
    }))
}

fn search_messages(state: &AppState, args: &Value) -> ToolResponse {
    let Some(query) = required_str(args, "query") else {
        return missing("query");
    };
    let conversation_id = args.get("conversation_id").and_then(|v| v.as_str());
    let limit = opt_usize(args, "limit");

    let hits = state.bot.search_messages(query, conversation_id, limit);
    ToolResponse::ok(json!({
        "query": query,
        "count": hits.len(),
        "messages": hits,
    }))
}

fn get_bot_status(state: &AppState) -> ToolResponse {
    match serde_json::to_value(state.bot.status()) {
        Ok(status) => ToolResponse::ok(status),
        Err(e) => ToolResponse::fail(e),
    }
}

async fn get_job_listings(state: &AppState, args: &Value) -> ToolResponse {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("internship");
    let limit = opt_usize(args, "limit");

    match state.listings.fetch_listings(query, limit).await {
        Ok(rows) => ToolResponse::ok(json!({
            "query": query,
            "count": rows.len(),
            "listings": rows,
        })),
        Err(e) => {
            error!("get_job_listings tool error: {}", e);
            ToolResponse::fail(e)
        }
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn opt_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|n| n as usize)
}

fn missing(key: &str) -> ToolResponse {
    ToolResponse::fail(format!("missing required parameter: {}", key))
}
