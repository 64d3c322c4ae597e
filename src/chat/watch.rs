//! Live conversation watch: a cancellable polling loop over
//! MutationObserver-flagged message elements.
//!
//! The observer runs in-page and only *marks* newly-added elements that match
//! the candidate set; it never extracts. Each poll cycle collects the marked
//! elements' outer HTML, clears the marks, and classifies the fragments with
//! the same pure classifier as one-shot extraction. A bad cycle is logged
//! and backed off, never fatal — the loop ends only when the cancellation
//! flag flips.

use chromiumoxide::Page;
use rand::distr::{Distribution, Uniform};
use scraper::{ElementRef, Html};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chat::classify::Classifier;
use crate::chat::selectors::SelectorBook;
use crate::core::clock::Clock;
use crate::core::error::ExtractError;
use crate::core::types::Message;

/// Attribute the in-page observer stamps onto newly-added message elements.
const NEW_FLAG_ATTR: &str = "data-scout-new";

/// Poll cadence window (jittered per cycle).
const POLL_MIN_MS: u64 = 1000;
const POLL_MAX_MS: u64 = 2000;
/// Backoff window after a failed cycle.
const BACKOFF_MIN_MS: u64 = 5000;
const BACKOFF_MAX_MS: u64 = 10_000;

pub struct LiveWatch {
    book: SelectorBook,
    classifier: Classifier,
    clock: Arc<dyn Clock>,
}

impl LiveWatch {
    pub fn new(book: SelectorBook, clock: Arc<dyn Clock>) -> Self {
        let classifier = Classifier::new(&book.own_markers);
        Self { book, classifier, clock }
    }

    /// Install the observer and poll until `cancel` flips to `true`.
    ///
    /// Incoming (non-self) messages are pushed into `sink`; the caller owns
    /// persistence. Cancellation is checked once per cycle, so latency is at
    /// most one poll interval plus any in-flight wait.
    pub async fn run(
        &self,
        page: &Page,
        conversation_id: &str,
        cancel: watch::Receiver<bool>,
        sink: mpsc::UnboundedSender<Message>,
    ) -> Result<(), ExtractError> {
        self.install_observer(page).await?;
        info!("live watch started for conversation {}", conversation_id);

        loop {
            if *cancel.borrow() {
                info!("live watch cancelled for conversation {}", conversation_id);
                return Ok(());
            }

            match self.drain_flagged(page, conversation_id).await {
                Ok(new_messages) => {
                    for msg in new_messages {
                        if msg.is_own() {
                            // Local echoes of our own sends; history already
                            // has them via the dispatcher's append.
                            continue;
                        }
                        debug!("live watch picked up a message from {}", msg.sender);
                        if sink.send(msg).is_err() {
                            info!("live watch sink closed — stopping");
                            return Ok(());
                        }
                    }
                    let pause = sample_ms(POLL_MIN_MS, POLL_MAX_MS);
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                }
                Err(e) => {
                    let backoff = sample_ms(BACKOFF_MIN_MS, BACKOFF_MAX_MS);
                    warn!("live watch cycle failed ({e}) — backing off {} ms", backoff);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    /// Install the flagging MutationObserver, scoped to the detected
    /// container or the whole document when no container matches.
    async fn install_observer(&self, page: &Page) -> Result<(), ExtractError> {
        let group = js_str(&self.book.messages_css_group());
        let containers = js_str(&self.book.containers_css_group());
        let js = format!(
            r#"(() => {{
                if (window.__scoutWatch) return 'already-installed';
                const sel = {group};
                const root = document.querySelector({containers}) || document;
                const mark = (el) => {{ try {{ el.setAttribute('{NEW_FLAG_ATTR}', '1'); }} catch (e) {{}} }};
                const obs = new MutationObserver((muts) => {{
                    for (const m of muts) {{
                        for (const n of m.addedNodes) {{
                            if (n.nodeType !== 1) continue;
                            if (n.matches && n.matches(sel)) mark(n);
                            if (n.querySelectorAll) n.querySelectorAll(sel).forEach(mark);
                        }}
                    }}
                }});
                obs.observe(root === document ? document.documentElement : root,
                            {{ childList: true, subtree: true }});
                window.__scoutWatch = obs;
                return 'installed';
            }})()"#
        );
        let outcome = page
            .evaluate(js)
            .await?
            .into_value::<String>()
            .unwrap_or_default();
        debug!("mutation observer: {}", outcome);
        Ok(())
    }

    /// Collect flagged elements' outer HTML, clear the flags, classify.
    async fn drain_flagged(
        &self,
        page: &Page,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ExtractError> {
        let js = format!(
            r#"(() => {{
                const flagged = Array.from(document.querySelectorAll('[{NEW_FLAG_ATTR}="1"]'));
                const out = flagged.map(el => el.outerHTML);
                flagged.forEach(el => el.removeAttribute('{NEW_FLAG_ATTR}'));
                return out;
            }})()"#
        );
        let fragments = page
            .evaluate(js)
            .await?
            .into_value::<Vec<String>>()
            .unwrap_or_default();

        let now = self.clock.now();
        let mut messages = Vec::with_capacity(fragments.len());
        for (index, html) in fragments.iter().enumerate() {
            let frag = Html::parse_fragment(html);
            let Some(element) = frag
                .root_element()
                .children()
                .filter_map(ElementRef::wrap)
                .next()
            else {
                continue;
            };
            if let Some(msg) = self.classifier.classify(element, index, conversation_id, now) {
                messages.push(msg);
            }
        }
        Ok(messages)
    }
}

fn sample_ms(min: u64, max: u64) -> u64 {
    let mut rng = rand::rng();
    Uniform::new(min, max).unwrap().sample(&mut rng)
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use chrono::TimeZone;

    #[test]
    fn poll_and_backoff_samples_stay_in_their_windows() {
        for _ in 0..50 {
            let p = sample_ms(POLL_MIN_MS, POLL_MAX_MS);
            assert!((POLL_MIN_MS..POLL_MAX_MS).contains(&p));
            let b = sample_ms(BACKOFF_MIN_MS, BACKOFF_MAX_MS);
            assert!((BACKOFF_MIN_MS..BACKOFF_MAX_MS).contains(&b));
        }
    }

    #[test]
    fn fragment_classification_reuses_the_standard_policy() {
        let clock = Arc::new(FixedClock(
            chrono::Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        ));
        let lw = LiveWatch::new(SelectorBook::default(), clock);

        let frag = Html::parse_fragment(
            r#"<div class="chat-message message-sent"><p>mine</p></div>"#,
        );
        let element = frag
            .root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .next()
            .unwrap();
        let msg = lw.classifier.classify(element, 0, "c", lw.clock.now()).unwrap();
        assert!(msg.is_own());
    }

    #[test]
    fn js_strings_are_safely_quoted() {
        let quoted = js_str("[class*='message']");
        assert!(quoted.starts_with('"') && quoted.ends_with('"'));
        assert!(quoted.contains("message"));
    }
}
