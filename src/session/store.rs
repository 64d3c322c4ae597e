//! Durable JSON stores for cookies, chat history and session snapshots.
//!
//! Three independent documents live under the configured data directory:
//!
//! * `cookies.json`          — the current authentication cookie jar
//! * `message_history.json`  — conversation id → message log
//! * `sessions.json`         — session id → opaque snapshot payload
//!
//! Every write is a whole-file rewrite via temp-file-then-rename, so a
//! concurrent reader never observes a partial document. Every read loads
//! fresh from disk; a missing or corrupt file is treated as absent rather
//! than an error, and I/O failures degrade to a logged warning. Staleness
//! is enforced at load time: a cookie jar or snapshot older than the
//! configured age is reported as absent even when the file parses fine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chat::classify;
use crate::core::clock::Clock;
use crate::core::types::{ConversationRecord, CookieDocument, Message, SessionRecord, StoreStats};

const COOKIES_FILE: &str = "cookies.json";
const HISTORY_FILE: &str = "message_history.json";
const SESSIONS_FILE: &str = "sessions.json";

/// How many trailing messages of a conversation an append is checked
/// against. Extractions hand us messages newest-last, so a re-observed
/// message always sits near the tail.
const APPEND_DEDUP_WINDOW: usize = 50;

pub struct SessionStore {
    data_dir: PathBuf,
    max_age_days: i64,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(data_dir: PathBuf, max_age_days: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            data_dir,
            max_age_days,
            clock,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cookies
    // ─────────────────────────────────────────────────────────────────────

    /// Overwrite the stored cookie jar with a freshly captured one.
    pub fn save_cookies(&self, raw_cookies: Vec<serde_json::Value>, domain: &str) {
        let doc = CookieDocument {
            cookies: raw_cookies,
            timestamp: self.clock.now(),
            domain: domain.to_string(),
        };
        info!(
            "store: 🍪 saving {} cookies for '{}'",
            doc.cookies.len(),
            doc.domain
        );
        self.write_json(&self.cookies_path(), &doc);
    }

    /// Load the stored cookie jar, or `None` when it is missing, corrupt
    /// or older than the configured maximum age.
    pub fn load_cookies(&self) -> Option<CookieDocument> {
        let doc: CookieDocument = self.read_json(&self.cookies_path())?;

        let age = self.clock.now() - doc.timestamp;
        if age > Duration::days(self.max_age_days) {
            info!(
                "store: stored session for '{}' is {} days old (limit {}) — treating as absent",
                doc.domain,
                age.num_days(),
                self.max_age_days
            );
            return None;
        }

        debug!(
            "store: loaded {} cookies for '{}' ({}h old)",
            doc.cookies.len(),
            doc.domain,
            age.num_hours()
        );
        Some(doc)
    }

    /// Remove the stored cookie jar so the next login starts from scratch.
    pub fn clear_cookies(&self) {
        let path = self.cookies_path();
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("store: 🗑️  removed stored cookie jar"),
                Err(e) => warn!("store: failed to remove {}: {}", path.display(), e),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat history
    // ─────────────────────────────────────────────────────────────────────

    /// Replace one conversation's stored log with a freshly extracted one.
    pub fn save_history(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut history = self.history();
        let count = messages.len();
        history.insert(
            conversation_id.to_string(),
            ConversationRecord {
                messages,
                last_updated: Some(self.clock.now()),
                message_count: count,
            },
        );
        info!(
            "store: saved {} messages for conversation '{}'",
            count, conversation_id
        );
        self.write_json(&self.history_path(), &history);
    }

    /// Append a single message to a conversation's log.
    ///
    /// Returns `false` (and stores nothing) when the message duplicates a
    /// recently stored entry under the text + timestamp-proximity rule, so
    /// re-observing the same DOM node never double-logs.
    pub fn append_message(&self, conversation_id: &str, message: Message) -> bool {
        let mut history = self.history();
        let record = history.entry(conversation_id.to_string()).or_default();

        let tail_start = record.messages.len().saturating_sub(APPEND_DEDUP_WINDOW);
        if record.messages[tail_start..]
            .iter()
            .any(|existing| classify::is_duplicate(existing, &message))
        {
            debug!(
                "store: skipping duplicate append for conversation '{}'",
                conversation_id
            );
            return false;
        }

        record.messages.push(message);
        record.message_count = record.messages.len();
        record.last_updated = Some(self.clock.now());
        self.write_json(&self.history_path(), &history);
        true
    }

    /// Stored log for one conversation, if any.
    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.history().remove(conversation_id)
    }

    /// The full history document, loaded fresh from disk.
    pub fn history(&self) -> HashMap<String, ConversationRecord> {
        self.read_json(&self.history_path()).unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session snapshots
    // ─────────────────────────────────────────────────────────────────────

    /// Store an opaque snapshot payload under a session id.
    pub fn save_session_snapshot(&self, session_id: &str, payload: serde_json::Value) {
        let mut sessions: HashMap<String, SessionRecord> =
            self.read_json(&self.sessions_path()).unwrap_or_default();
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                timestamp: self.clock.now(),
                payload,
            },
        );
        self.write_json(&self.sessions_path(), &sessions);
    }

    /// Load a snapshot by id; ages out on the same schedule as cookies.
    pub fn load_session_snapshot(&self, session_id: &str) -> Option<SessionRecord> {
        let mut sessions: HashMap<String, SessionRecord> =
            self.read_json(&self.sessions_path())?;
        let record = sessions.remove(session_id)?;

        let age = self.clock.now() - record.timestamp;
        if age > Duration::days(self.max_age_days) {
            info!(
                "store: session snapshot '{}' is {} days old — treating as absent",
                session_id,
                age.num_days()
            );
            return None;
        }
        Some(record)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stats
    // ─────────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> StoreStats {
        let history = self.history();
        let messages = history.values().map(|r| r.messages.len()).sum();

        // Age is reported from the raw document so an operator can see how
        // stale an expired jar is; has_session applies the staleness rule.
        let raw: Option<CookieDocument> = self.read_json(&self.cookies_path());
        let session_age_hours = raw
            .as_ref()
            .map(|doc| (self.clock.now() - doc.timestamp).num_hours());

        StoreStats {
            conversations: history.len(),
            messages,
            has_session: self.load_cookies().is_some(),
            session_age_hours,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Disk plumbing
    // ─────────────────────────────────────────────────────────────────────

    fn cookies_path(&self) -> PathBuf {
        self.data_dir.join(COOKIES_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    /// Tolerant read: absent file is silent, unreadable or corrupt files
    /// warn and read as absent.
    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!("store: failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(
                    "store: failed to parse {}: {} — treating as absent",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Atomic write via temp file + rename; failures are logged, never
    /// propagated.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) {
        if let Err(e) = std::fs::create_dir_all(&self.data_dir) {
            warn!(
                "store: failed to create {}: {}",
                self.data_dir.display(),
                e
            );
            return;
        }

        let json = match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("store: serialization failed for {}: {}", path.display(), e);
                return;
            }
        };

        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, &json) {
            warn!("store: failed to write {}: {}", tmp.display(), e);
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!(
                "store: failed to rename {} → {}: {}",
                tmp.display(),
                path.display(),
                e
            );
        }
    }
}
