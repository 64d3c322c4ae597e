use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a chat turn, derived from sender classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Sent,
    Received,
}

/// One chat turn, extracted from the inbox or locally echoed by a send.
///
/// `timestamp` is best-effort: parsed from markup when a recognizable
/// absolute or relative form exists, otherwise synthesized from extraction
/// order. Synthetic values preserve relative order only — they are not
/// wall-clock accurate and must not be treated as real send times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier attribute from the DOM when present, else synthesized as
    /// `{epochMillis}_{index}`. Synthesized ids are not stable across
    /// repeated extractions of the same conversation.
    pub id: String,
    pub conversation_id: String,
    /// Trimmed text content; never empty for a retained message.
    pub text: String,
    /// `"me"`, `"other"`, or a display name scraped next to the element.
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    /// Raw structural fingerprint of the source element, kept for audit.
    #[serde(default)]
    pub element_class: String,
    #[serde(default)]
    pub contains_links: bool,
    #[serde(default)]
    pub contains_mentions: bool,
}

impl Message {
    pub fn is_own(&self) -> bool {
        self.kind == MessageKind::Sent
    }
}

/// Persisted per-conversation history: an append-only message log plus
/// bookkeeping the status surface reports without walking every message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
}

/// On-disk cookie snapshot — the single current session for the account.
/// Overwritten whole on each successful login, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieDocument {
    /// Raw CDP cookie objects, stored verbatim for lossless re-injection.
    pub cookies: Vec<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub domain: String,
}

/// One entry in the sessions document, keyed by a generated id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One row of the `get_conversations` listing — the record without its
/// message bodies, plus a short preview of the latest turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub message_count: usize,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// Aggregate numbers over the persisted stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub conversations: usize,
    pub messages: usize,
    pub has_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_age_hours: Option<i64>,
}

/// Snapshot returned by the `get_bot_status` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub state: String,
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watching: Option<String>,
    pub stats: StoreStats,
}
