//! Per-element message classification.
//!
//! Everything here is a pure function of one DOM element, its index within
//! the pass, and an injected "now" — no page handle, no I/O. The extraction
//! and live-watch paths both funnel through [`Classifier::classify`], so a
//! markup quirk only ever needs fixing in one place and the whole policy is
//! unit-testable against fixture HTML.

use aho_corasick::AhoCorasick;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;
use tracing::warn;

use crate::chat::selectors::{
    MESSAGE_ID_ATTRS, MESSAGE_TEXT_CANDIDATES, OWN_MARKERS, SELF_TEXT_MARKERS,
    SENDER_NAME_CANDIDATES, TIMESTAMP_ATTRS, TIME_NODE_CANDIDATES,
};
use crate::core::types::{Message, MessageKind};

static RELATIVE_RE: OnceLock<Regex> = OnceLock::new();
static LINK_RE: OnceLock<Regex> = OnceLock::new();
static MENTION_RE: OnceLock<Regex> = OnceLock::new();

fn relative_re() -> &'static Regex {
    RELATIVE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+)\s*(minute|min|hour|hr|day|week)s?\s*ago\s*$")
            .expect("valid relative-time pattern")
    })
}

fn link_re() -> &'static Regex {
    LINK_RE.get_or_init(|| {
        Regex::new(r"(?i)\bhttps?://\S+|\bwww\.[a-z0-9][^\s]*").expect("valid link pattern")
    })
}

fn mention_re() -> &'static Regex {
    MENTION_RE.get_or_init(|| Regex::new(r"@\w{2,}").expect("valid mention pattern"))
}

/// Classifies raw message elements into [`Message`] values.
///
/// Construction compiles the own-message marker automaton once; the marker
/// list is config-overridable, so a bad override falls back to the built-in
/// set rather than disabling ownership detection entirely.
pub struct Classifier {
    own_markers: AhoCorasick,
}

impl Classifier {
    pub fn new(own_markers: &[String]) -> Self {
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(own_markers)
            .unwrap_or_else(|e| {
                warn!("own-marker automaton rejected ({e}) — using built-in markers");
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(OWN_MARKERS)
                    .expect("built-in own markers compile")
            });
        Self { own_markers: automaton }
    }

    /// Classify one element at `index` within the pass.
    ///
    /// Returns `None` when the element carries no text after trimming —
    /// such elements contribute nothing to the pass.
    pub fn classify(
        &self,
        element: ElementRef<'_>,
        index: usize,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Message> {
        let text = message_text(element)?;

        let element_class = element.value().attr("class").unwrap_or("").to_string();
        let own = self.is_own_message(element, &text);

        let (sender, kind) = if own {
            ("me".to_string(), MessageKind::Sent)
        } else {
            (
                sender_name(element).unwrap_or_else(|| "other".to_string()),
                MessageKind::Received,
            )
        };

        let timestamp = explicit_timestamp(element, now)
            .unwrap_or_else(|| now - Duration::minutes(index as i64));

        let id = explicit_id(element)
            .unwrap_or_else(|| format!("{}_{}", now.timestamp_millis(), index));

        Some(Message {
            id,
            conversation_id: conversation_id.to_string(),
            contains_links: link_re().is_match(&text),
            contains_mentions: mention_re().is_match(&text),
            text,
            sender,
            kind,
            timestamp,
            element_class,
        })
    }

    /// Ownership: a marker class fragment on the element or any ancestor,
    /// or a self-authorship marker inside the text. This boolean is the sole
    /// source of truth for `sender` / `type`.
    fn is_own_message(&self, element: ElementRef<'_>, text: &str) -> bool {
        if self.own_markers.is_match(element.value().attr("class").unwrap_or("")) {
            return true;
        }
        for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
            if self.own_markers.is_match(ancestor.value().attr("class").unwrap_or("")) {
                return true;
            }
        }
        SELF_TEXT_MARKERS.iter().any(|m| text.contains(m))
    }
}

/// Body text: prefer a dedicated text child so sender labels and timestamp
/// captions don't leak into the message body; fall back to the element's own
/// text. `None` when nothing non-empty remains after trimming.
fn message_text(element: ElementRef<'_>) -> Option<String> {
    for cand in MESSAGE_TEXT_CANDIDATES {
        let Ok(selector) = Selector::parse(cand) else {
            continue;
        };
        if let Some(child) = element.select(&selector).next() {
            let text = collapse_ws(&child.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    let text = collapse_ws(&element.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn collapse_ws(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sender_name(element: ElementRef<'_>) -> Option<String> {
    for cand in SENDER_NAME_CANDIDATES {
        let Ok(selector) = Selector::parse(cand) else {
            continue;
        };
        if let Some(node) = element.select(&selector).next() {
            let name = collapse_ws(&node.text().collect::<String>());
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn explicit_id(element: ElementRef<'_>) -> Option<String> {
    for attr in MESSAGE_ID_ATTRS {
        if let Some(v) = element.value().attr(attr) {
            let v = v.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Probe the element's timestamp attributes, then any nested time node's
/// attributes and text, and parse the first value that yields an instant.
fn explicit_timestamp(element: ElementRef<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    for attr in TIMESTAMP_ATTRS {
        if let Some(raw) = element.value().attr(attr) {
            if let Some(ts) = parse_timestamp(raw, now) {
                return Some(ts);
            }
        }
    }
    for cand in TIME_NODE_CANDIDATES {
        let Ok(selector) = Selector::parse(cand) else {
            continue;
        };
        if let Some(node) = element.select(&selector).next() {
            for attr in TIMESTAMP_ATTRS {
                if let Some(raw) = node.value().attr(attr) {
                    if let Some(ts) = parse_timestamp(raw, now) {
                        return Some(ts);
                    }
                }
            }
            let text = node.text().collect::<String>();
            if let Some(ts) = parse_timestamp(&text, now) {
                return Some(ts);
            }
        }
    }
    None
}

/// Parse one raw timestamp value.
///
/// Accepted, in order: epoch seconds/millis, RFC 3339, a few bare
/// `YYYY-MM-DD`-style forms assumed UTC, and relative phrases
/// ("5 minutes ago") resolved against `now`. Anything else is `None` and the
/// caller falls back to index-based synthesis.
pub fn parse_timestamp(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        if raw.len() >= 13 {
            if let Ok(ms) = raw.parse::<i64>() {
                return DateTime::from_timestamp_millis(ms);
            }
        } else if raw.len() == 10 {
            if let Ok(secs) = raw.parse::<i64>() {
                return DateTime::from_timestamp(secs, 0);
            }
        }
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d %b %Y %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Some(caps) = relative_re().captures(raw) {
        let n: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "minute" | "min" => Duration::minutes(n),
            "hour" | "hr" => Duration::hours(n),
            "day" => Duration::days(n),
            "week" => Duration::weeks(n),
            _ => return None,
        };
        return Some(now - delta);
    }

    None
}

// ── Pass-wide policies ──────────────────────────────────────────────────────

/// Two messages are duplicates when their text is byte-identical and their
/// timestamps sit within one second of each other. Used both for the
/// per-pass sweep and for append-time dedup in the history store.
pub fn is_duplicate(a: &Message, b: &Message) -> bool {
    a.text == b.text && (a.timestamp - b.timestamp).num_milliseconds().abs() < 1000
}

/// One sweep over a full pass: keep the first occurrence of each duplicate
/// group in iteration order, drop the rest.
pub fn dedup_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut kept: Vec<Message> = Vec::with_capacity(messages.len());
    for candidate in messages {
        if !kept.iter().any(|m| is_duplicate(m, &candidate)) {
            kept.push(candidate);
        }
    }
    kept
}

/// Final ordering: ascending by timestamp. Stable, so dedup's
/// first-occurrence choice survives ties.
pub fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}

/// Link / mention flags for text that never went through the DOM pipeline,
/// e.g. the local echo of an outgoing message.
pub fn content_flags(text: &str) -> (bool, bool) {
    (link_re().is_match(text), mention_re().is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::selectors::first_match;
    use chrono::TimeZone;
    use scraper::Html;

    fn classifier() -> Classifier {
        Classifier::new(
            &OWN_MARKERS.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    fn pinned_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn classify_first(html: &str, index: usize) -> Option<Message> {
        let doc = Html::parse_fragment(html);
        let hit = first_match(&doc, &[".chat-message"])?;
        classifier().classify(hit.elements[0], index, "conv-1", pinned_now())
    }

    // ── text ──

    #[test]
    fn empty_text_contributes_nothing() {
        assert!(classify_first(r#"<div class="chat-message">   </div>"#, 0).is_none());
    }

    #[test]
    fn dedicated_text_child_beats_whole_element_text() {
        let msg = classify_first(
            r#"<div class="chat-message">
                 <span class="sender-name">Priya</span>
                 <p class="message-text">see you at 5</p>
                 <span class="message-time">2 hours ago</span>
               </div>"#,
            0,
        )
        .unwrap();
        assert_eq!(msg.text, "see you at 5");
        assert_eq!(msg.sender, "Priya");
        assert_eq!(msg.kind, MessageKind::Received);
    }

    #[test]
    fn whitespace_is_collapsed() {
        let msg = classify_first(
            "<div class=\"chat-message\">hello\n\t  there</div>",
            0,
        )
        .unwrap();
        assert_eq!(msg.text, "hello there");
    }

    // ── ownership ──

    #[test]
    fn marker_class_on_element_means_sent() {
        let msg = classify_first(
            r#"<div class="chat-message message-sent">mine</div>"#,
            0,
        )
        .unwrap();
        assert_eq!(msg.sender, "me");
        assert_eq!(msg.kind, MessageKind::Sent);
        assert!(msg.is_own());
    }

    #[test]
    fn marker_class_on_ancestor_means_sent() {
        let doc = Html::parse_fragment(
            r#"<div class="outgoing"><div class="chat-message">mine</div></div>"#,
        );
        let hit = first_match(&doc, &[".chat-message"]).unwrap();
        let msg = classifier()
            .classify(hit.elements[0], 0, "conv-1", pinned_now())
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Sent);
    }

    #[test]
    fn self_text_marker_means_sent() {
        let msg =
            classify_first(r#"<div class="chat-message">You: on my way</div>"#, 0).unwrap();
        assert_eq!(msg.kind, MessageKind::Sent);
    }

    #[test]
    fn unmarked_element_without_name_is_other() {
        let msg = classify_first(r#"<div class="chat-message">hello</div>"#, 0).unwrap();
        assert_eq!(msg.sender, "other");
        assert_eq!(msg.kind, MessageKind::Received);
    }

    // ── timestamps ──

    #[test]
    fn epoch_millis_attribute_wins() {
        let msg = classify_first(
            r#"<div class="chat-message" data-timestamp="1741600800000">hi</div>"#,
            3,
        )
        .unwrap();
        assert_eq!(msg.timestamp.timestamp_millis(), 1_741_600_800_000);
    }

    #[test]
    fn rfc3339_time_node_is_parsed() {
        let msg = classify_first(
            r#"<div class="chat-message">hi <time datetime="2025-03-09T08:30:00Z">yesterday</time></div>"#,
            0,
        )
        .unwrap();
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2025, 3, 9, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn relative_phrases_resolve_against_now() {
        let now = pinned_now();
        assert_eq!(
            parse_timestamp("5 minutes ago", now),
            Some(now - Duration::minutes(5))
        );
        assert_eq!(parse_timestamp("2 hours ago", now), Some(now - Duration::hours(2)));
        assert_eq!(parse_timestamp("3 days ago", now), Some(now - Duration::days(3)));
        assert_eq!(parse_timestamp("1 week ago", now), Some(now - Duration::weeks(1)));
    }

    #[test]
    fn unparseable_time_synthesizes_now_minus_index_minutes() {
        let msg = classify_first(
            r#"<div class="chat-message"><span class="message-time">whenever</span><p>hi</p></div>"#,
            4,
        )
        .unwrap();
        assert_eq!(msg.timestamp, pinned_now() - Duration::minutes(4));
    }

    #[test]
    fn garbage_absolute_forms_are_rejected() {
        let now = pinned_now();
        assert_eq!(parse_timestamp("soon", now), None);
        assert_eq!(parse_timestamp("", now), None);
        assert_eq!(parse_timestamp("12345", now), None); // neither secs nor millis
    }

    // ── ids ──

    #[test]
    fn explicit_id_attribute_is_kept() {
        let msg = classify_first(
            r#"<div class="chat-message" data-message-id="m-77">hi</div>"#,
            0,
        )
        .unwrap();
        assert_eq!(msg.id, "m-77");
    }

    #[test]
    fn synthesized_id_is_epoch_millis_underscore_index() {
        let msg = classify_first(r#"<div class="chat-message">hi</div>"#, 6).unwrap();
        let expected = format!("{}_{}", pinned_now().timestamp_millis(), 6);
        assert_eq!(msg.id, expected);
    }

    // ── text flags ──

    #[test]
    fn links_and_mentions_are_flagged() {
        let with_link =
            classify_first(r#"<div class="chat-message">see https://example.com/x</div>"#, 0)
                .unwrap();
        assert!(with_link.contains_links);
        assert!(!with_link.contains_mentions);

        let with_mention =
            classify_first(r#"<div class="chat-message">ping @recruiter please</div>"#, 0)
                .unwrap();
        assert!(with_mention.contains_mentions);
        assert!(!with_mention.contains_links);
    }

    // ── dedup + ordering ──

    fn mk(text: &str, offset_ms: i64) -> Message {
        Message {
            id: format!("id-{offset_ms}"),
            conversation_id: "conv-1".to_string(),
            text: text.to_string(),
            sender: "other".to_string(),
            kind: MessageKind::Received,
            timestamp: pinned_now() + Duration::milliseconds(offset_ms),
            element_class: String::new(),
            contains_links: false,
            contains_mentions: false,
        }
    }

    #[test]
    fn near_duplicates_keep_first_occurrence_only() {
        let out = dedup_messages(vec![mk("hi", 0), mk("hi", 400), mk("hi", 999)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "id-0");
    }

    #[test]
    fn same_text_a_second_apart_is_not_a_duplicate() {
        let out = dedup_messages(vec![mk("hi", 0), mk("hi", 1000)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn different_text_at_the_same_instant_survives() {
        let out = dedup_messages(vec![mk("hi", 0), mk("hello", 0)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn sort_is_ascending_by_timestamp() {
        let mut msgs = vec![mk("c", 5000), mk("a", 1000), mk("b", 3000)];
        sort_by_timestamp(&mut msgs);
        let texts: Vec<&str> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }
}
