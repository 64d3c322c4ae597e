//! Ordered candidate selector books for the target platform's markup.
//!
//! The site ships no stable schema: class names churn between deploys and
//! A/B buckets. Every DOM lookup in the engine therefore goes through an
//! ordered fallback list — most-specific candidate first, and the first
//! candidate that yields at least one match wins the whole pass. Partial
//! results from different candidates are never merged; two overlapping
//! patterns would double-count the same elements.
//!
//! The lists are data, not code. Operators can replace any book through the
//! `selectors` key of inbox-scout.json without touching extraction logic.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::core::config::SelectorOverrides;

// ── Built-in books ──────────────────────────────────────────────────────────

/// Candidates describing "one message element", most-specific first.
pub const MESSAGE_CANDIDATES: &[&str] = &[
    "[data-message-id]",
    ".message-container .message-item",
    ".chat-message-wrapper .chat-message",
    "div.message[data-sender]",
    ".chat_message",
    ".chat-message",
    ".message-bubble",
    ".msg-item",
    ".message-item",
    ".message-row",
    ".conversation-message",
    ".chat-bubble",
    "li.message",
    "div.message",
    ".im-message",
    ".text-message",
    "[class*='message-body']",
    "[class*='chat-message']",
    ".bubble",
    "[class*='message']",
];

/// Candidates for the scrollable element that holds the message list.
pub const CONTAINER_CANDIDATES: &[&str] = &[
    "#chat-messages",
    ".chat-messages-container",
    ".messages-list",
    ".chat-body",
    ".conversation-container",
    ".message-list",
    "[class*='message-list']",
    ".chat-container",
];

/// Candidates for the compose input. Deliberately short: a wrong guess here
/// types into the search box.
pub const COMPOSE_INPUT_CANDIDATES: &[&str] = &[
    "textarea[name='message']",
    "#message-input",
    ".chat-input textarea",
    "textarea.compose-input",
    "[contenteditable='true'][role='textbox']",
    ".chat-footer textarea",
];

/// Candidates for the send control.
pub const SEND_BUTTON_CANDIDATES: &[&str] = &[
    "button.send-button",
    "#send-message-button",
    ".chat-input button[type='submit']",
    "button[aria-label='Send']",
    ".chat-footer button[type='submit']",
    "button[class*='send']",
];

/// Class fragments that mark an element (or an ancestor) as an outgoing
/// message. Scanned as substrings over the element's class fingerprint.
pub const OWN_MARKERS: &[&str] = &[
    "message-sent",
    "sent-message",
    "outgoing",
    "own-message",
    "self-message",
    "from-me",
    "message-right",
    "chat-right",
    "is-sender",
];

/// Text prefixes that mark self-authorship when structure gives nothing.
pub const SELF_TEXT_MARKERS: &[&str] = &["You:", "You :"];

/// Nested nodes that carry the sender's display name.
pub const SENDER_NAME_CANDIDATES: &[&str] = &[
    ".sender-name",
    ".message-sender",
    ".author",
    "[data-sender-name]",
];

/// Nested nodes that carry the message body proper. Probed before falling
/// back to the whole element's text, which would also swallow the sender
/// label and timestamp captions.
pub const MESSAGE_TEXT_CANDIDATES: &[&str] = &[
    ".message-text",
    ".msg-text",
    ".message-body",
    ".message-content",
    ".text",
    "p",
];

/// Nested nodes that carry a timestamp.
pub const TIME_NODE_CANDIDATES: &[&str] = &[
    "time",
    "[data-timestamp]",
    ".message-time",
    ".timestamp",
    ".time",
];

/// Attributes probed (in order) for an explicit message identifier.
pub const MESSAGE_ID_ATTRS: &[&str] = &["data-message-id", "data-id", "id"];

/// Attributes probed (in order) for an explicit timestamp value.
pub const TIMESTAMP_ATTRS: &[&str] = &["data-timestamp", "data-time", "datetime"];

/// History-loading spinners shown while older messages stream in.
pub const LOADING_INDICATOR_CANDIDATES: &[&str] = &[
    ".chat-loading",
    ".loading-indicator",
    ".messages-loading",
    ".spinner",
    "[class*='loading']",
];

// ── Login form books ────────────────────────────────────────────────────────

pub const EMAIL_INPUT_CANDIDATES: &[&str] = &[
    "input[type='email']",
    "input[name='email']",
    "#email",
    "input[name='username']",
    "#login-email",
    "input[autocomplete='username']",
];

pub const PASSWORD_INPUT_CANDIDATES: &[&str] = &[
    "input[type='password']",
    "input[name='password']",
    "#password",
    "#login-password",
];

pub const LOGIN_SUBMIT_CANDIDATES: &[&str] = &[
    "#login-submit",
    "button.login-button",
    "form button[type='submit']",
    "input[type='submit']",
    "button[type='submit']",
];

/// Captcha presence probes, checked after the credentials are typed.
pub const CAPTCHA_CANDIDATES: &[&str] = &[
    "iframe[src*='recaptcha']",
    ".g-recaptcha",
    "img.captcha-image",
    "#captcha",
    "[class*='captcha']",
];

/// Where an image-captcha solution gets typed.
pub const CAPTCHA_INPUT_CANDIDATES: &[&str] = &[
    "input[name='captcha']",
    "#captcha-input",
    "input[class*='captcha']",
];

/// Login error banners. Matching one of these is an explicit rejection,
/// reported differently from a silent timeout.
pub const LOGIN_ERROR_CANDIDATES: &[&str] = &[
    ".login-error",
    ".error-message",
    ".alert-danger",
    ".form-error",
    "[class*='error']",
];

/// Markup that only renders for an authenticated user.
pub const DASHBOARD_MARKUP_CANDIDATES: &[&str] = &[
    "#dashboard",
    ".dashboard",
    ".user-profile",
    ".profile-dropdown",
    "nav .avatar",
    "[class*='dashboard']",
];

// ── Resolved book ───────────────────────────────────────────────────────────

/// The candidate lists actually in force: built-ins unless an override list
/// from config is non-empty, in which case the override replaces the book
/// wholesale (no merging — order is the contract).
#[derive(Debug, Clone)]
pub struct SelectorBook {
    pub messages: Vec<String>,
    pub containers: Vec<String>,
    pub compose_inputs: Vec<String>,
    pub send_buttons: Vec<String>,
    pub own_markers: Vec<String>,
}

impl Default for SelectorBook {
    fn default() -> Self {
        Self {
            messages: to_owned(MESSAGE_CANDIDATES),
            containers: to_owned(CONTAINER_CANDIDATES),
            compose_inputs: to_owned(COMPOSE_INPUT_CANDIDATES),
            send_buttons: to_owned(SEND_BUTTON_CANDIDATES),
            own_markers: to_owned(OWN_MARKERS),
        }
    }
}

impl SelectorBook {
    pub fn from_overrides(overrides: &SelectorOverrides) -> Self {
        let mut book = Self::default();
        apply_override(&mut book.messages, &overrides.messages, "messages");
        apply_override(&mut book.containers, &overrides.containers, "containers");
        apply_override(&mut book.compose_inputs, &overrides.compose_inputs, "compose_inputs");
        apply_override(&mut book.send_buttons, &overrides.send_buttons, "send_buttons");
        apply_override(&mut book.own_markers, &overrides.own_markers, "own_markers");
        book
    }

    /// All message candidates joined into one CSS group, for in-page
    /// `querySelectorAll` use by the scroll loop and the live-watch observer.
    pub fn messages_css_group(&self) -> String {
        self.messages.join(", ")
    }

    pub fn containers_css_group(&self) -> String {
        self.containers.join(", ")
    }
}

fn to_owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn apply_override(slot: &mut Vec<String>, replacement: &[String], book: &str) {
    if replacement.is_empty() {
        return;
    }
    let valid: Vec<String> = replacement
        .iter()
        .filter(|s| {
            let ok = Selector::parse(s).is_ok();
            if !ok {
                warn!("selector override for '{}' rejected (bad CSS): {}", book, s);
            }
            ok
        })
        .cloned()
        .collect();
    if valid.is_empty() {
        warn!("selector override for '{}' had no valid entries — keeping built-ins", book);
        return;
    }
    *slot = valid;
}

// ── First-match engine ──────────────────────────────────────────────────────

/// The winning candidate of one fallback pass.
pub struct FirstMatch<'a> {
    /// Index of the winning candidate within the ordered list.
    pub candidate_index: usize,
    /// The winning pattern itself, for logs.
    pub selector: String,
    /// Every element the winning candidate matched, in document order.
    pub elements: Vec<ElementRef<'a>>,
}

/// Try candidates in order against a parsed document; the first candidate
/// with at least one match wins the pass and later candidates are never
/// consulted. Unparseable patterns are skipped.
pub fn first_match<'a, S: AsRef<str>>(doc: &'a Html, candidates: &[S]) -> Option<FirstMatch<'a>> {
    for (idx, cand) in candidates.iter().enumerate() {
        let cand = cand.as_ref();
        let Ok(selector) = Selector::parse(cand) else {
            continue;
        };
        let elements: Vec<ElementRef<'a>> = doc.select(&selector).collect();
        if !elements.is_empty() {
            debug!(
                "candidate #{} matched {} element(s): {}",
                idx,
                elements.len(),
                cand
            );
            return Some(FirstMatch {
                candidate_index: idx,
                selector: cand.to_string(),
                elements,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_books_are_valid_css() {
        for list in [
            MESSAGE_CANDIDATES,
            CONTAINER_CANDIDATES,
            COMPOSE_INPUT_CANDIDATES,
            SEND_BUTTON_CANDIDATES,
            SENDER_NAME_CANDIDATES,
            MESSAGE_TEXT_CANDIDATES,
            TIME_NODE_CANDIDATES,
            LOADING_INDICATOR_CANDIDATES,
            EMAIL_INPUT_CANDIDATES,
            PASSWORD_INPUT_CANDIDATES,
            LOGIN_SUBMIT_CANDIDATES,
            CAPTCHA_CANDIDATES,
            LOGIN_ERROR_CANDIDATES,
            DASHBOARD_MARKUP_CANDIDATES,
        ] {
            for cand in list {
                assert!(
                    Selector::parse(cand).is_ok(),
                    "built-in candidate fails to parse: {cand}"
                );
            }
        }
    }

    #[test]
    fn first_candidate_with_a_match_wins() {
        let html = Html::parse_document(
            r#"<div>
                 <p class="chat-message">hi</p>
                 <p class="message-bubble">ignored</p>
               </div>"#,
        );
        let candidates = ["[data-message-id]", ".chat-message", ".message-bubble"];
        let hit = first_match(&html, &candidates).unwrap();
        assert_eq!(hit.candidate_index, 1);
        assert_eq!(hit.elements.len(), 1);
    }

    #[test]
    fn later_candidates_are_not_merged_into_the_winner() {
        // Both .a and .b structures exist; only the winner's matches come back.
        let html = Html::parse_document(
            r#"<div>
                 <span class="a">one</span><span class="a">two</span>
                 <span class="b">three</span>
               </div>"#,
        );
        let candidates = [".missing", ".a", ".b"];
        let hit = first_match(&html, &candidates).unwrap();
        assert_eq!(hit.candidate_index, 1);
        assert_eq!(hit.elements.len(), 2);
    }

    #[test]
    fn exhausted_list_yields_none() {
        let html = Html::parse_document("<div><p>plain</p></div>");
        let candidates = [".x", ".y"];
        assert!(first_match(&html, &candidates).is_none());
    }

    #[test]
    fn overrides_replace_wholesale_and_drop_bad_css() {
        let overrides = SelectorOverrides {
            messages: vec!["div.custom".to_string(), ":::nope".to_string()],
            ..Default::default()
        };
        let book = SelectorBook::from_overrides(&overrides);
        assert_eq!(book.messages, vec!["div.custom".to_string()]);
        // Untouched books keep their built-ins.
        assert_eq!(book.containers.len(), CONTAINER_CANDIDATES.len());
    }
}
