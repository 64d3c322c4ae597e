//! Disk round-trips for the cookie jar, history log and session snapshots,
//! including the staleness rule that governs session reuse.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use inbox_scout::core::clock::FixedClock;
use inbox_scout::session::SessionStore;
use inbox_scout::types::{Message, MessageKind};
use tempfile::TempDir;

const MAX_AGE_DAYS: i64 = 7;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// A store over `dir` whose idea of "now" is pinned to `now`.
fn store_at(dir: &TempDir, now: DateTime<Utc>) -> SessionStore {
    SessionStore::new(
        dir.path().to_path_buf(),
        MAX_AGE_DAYS,
        Arc::new(FixedClock(now)),
    )
}

fn message(id: &str, text: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: "c1".to_string(),
        text: text.to_string(),
        sender: "other".to_string(),
        kind: MessageKind::Received,
        timestamp: at,
        element_class: "message".to_string(),
        contains_links: false,
        contains_mentions: false,
    }
}

#[test]
fn cookies_survive_within_the_age_limit() {
    let dir = TempDir::new().unwrap();
    let t0 = base_time();

    store_at(&dir, t0).save_cookies(
        vec![serde_json::json!({"name": "sid", "value": "abc"})],
        "internshala.com",
    );

    let six_days_later = store_at(&dir, t0 + chrono::Duration::days(6));
    let doc = six_days_later.load_cookies().expect("jar should still be valid");
    assert_eq!(doc.domain, "internshala.com");
    assert_eq!(doc.cookies.len(), 1);

    let stats = six_days_later.stats();
    assert!(stats.has_session);
    assert_eq!(stats.session_age_hours, Some(6 * 24));
}

#[test]
fn stale_cookies_read_as_absent_but_age_stays_visible() {
    let dir = TempDir::new().unwrap();
    let t0 = base_time();

    store_at(&dir, t0).save_cookies(vec![serde_json::json!({"name": "sid"})], "internshala.com");

    let eight_days_later = store_at(&dir, t0 + chrono::Duration::days(8));
    assert!(eight_days_later.load_cookies().is_none());

    // The raw file still exists, so the stats surface reports how stale it
    // is even though the session no longer counts as reusable.
    let stats = eight_days_later.stats();
    assert!(!stats.has_session);
    assert_eq!(stats.session_age_hours, Some(8 * 24));
}

#[test]
fn cleared_cookies_are_gone_for_good() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, base_time());

    store.save_cookies(vec![serde_json::json!({"name": "sid"})], "internshala.com");
    assert!(store.load_cookies().is_some());

    store.clear_cookies();
    assert!(store.load_cookies().is_none());
    assert_eq!(store.stats().session_age_hours, None);
}

#[test]
fn appending_the_same_message_twice_stores_it_once() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, base_time());
    let at = base_time();

    assert!(store.append_message("c1", message("m1", "hello there", at)));

    // Same text re-observed 500ms later, e.g. the watcher seeing the same
    // DOM node again with a re-synthesized timestamp.
    let echo = message("m1-again", "hello there", at + chrono::Duration::milliseconds(500));
    assert!(!store.append_message("c1", echo));

    let record = store.conversation("c1").expect("conversation should exist");
    assert_eq!(record.messages.len(), 1);
    assert_eq!(record.message_count, 1);
}

#[test]
fn appends_with_distinct_text_both_land() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, base_time());
    let at = base_time();

    assert!(store.append_message("c1", message("m1", "hello there", at)));
    assert!(store.append_message("c1", message("m2", "hello again", at)));

    let record = store.conversation("c1").expect("conversation should exist");
    assert_eq!(record.messages.len(), 2);
    assert!(record.last_updated.is_some());
}

#[test]
fn save_history_replaces_the_whole_log() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, base_time());
    let at = base_time();

    store.save_history(
        "c1",
        vec![message("m1", "one", at), message("m2", "two", at + chrono::Duration::seconds(5))],
    );
    store.save_history("c1", vec![message("m3", "three", at)]);

    let record = store.conversation("c1").expect("conversation should exist");
    assert_eq!(record.messages.len(), 1);
    assert_eq!(record.messages[0].text, "three");
}

#[test]
fn snapshots_age_out_like_cookies() {
    let dir = TempDir::new().unwrap();
    let t0 = base_time();

    store_at(&dir, t0).save_session_snapshot("s1", serde_json::json!({"state": "ready"}));

    let fresh = store_at(&dir, t0 + chrono::Duration::days(6))
        .load_session_snapshot("s1")
        .expect("snapshot should still be valid");
    assert_eq!(fresh.payload["state"], "ready");

    assert!(store_at(&dir, t0 + chrono::Duration::days(8))
        .load_session_snapshot("s1")
        .is_none());
}

#[test]
fn corrupt_history_reads_as_empty_and_recovers() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir, base_time());

    std::fs::write(dir.path().join("message_history.json"), "{not json at all").unwrap();
    assert!(store.history().is_empty());

    // The next append rewrites a clean document.
    assert!(store.append_message("c1", message("m1", "fresh start", base_time())));
    assert_eq!(store.conversation("c1").unwrap().messages.len(), 1);
}
