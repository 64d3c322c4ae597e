//! One-shot conversation extraction: wait for the message list, scroll the
//! backlog in, snapshot the DOM, classify.
//!
//! The browser is only asked for two things — scroll nudges and full-page
//! HTML. Everything that decides what a message *is* happens in Rust against
//! the snapshot (see `classify.rs`), which keeps the interesting logic
//! testable without a live Chromium.

use chromiumoxide::Page;
use rand::distr::{Distribution, Uniform};
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chat::classify::{dedup_messages, sort_by_timestamp, Classifier};
use crate::chat::selectors::{first_match, SelectorBook, LOADING_INDICATOR_CANDIDATES};
use crate::core::clock::Clock;
use crate::core::error::ExtractError;
use crate::core::types::Message;

/// Polling step while waiting for the first message element.
const WAIT_PROBE_MS: u64 = 500;
/// Probes before the container fallback kicks in (≈10 s).
const WAIT_PROBE_LIMIT: u32 = 20;
/// Fixed settle after the body-level containment probe.
const CONTAINER_SETTLE_MS: u64 = 2000;
/// Randomized settle window after each scroll nudge.
const SCROLL_SETTLE_MIN_MS: u64 = 1500;
const SCROLL_SETTLE_MAX_MS: u64 = 2500;
/// Bounded wait for a history-loading spinner to clear (failure tolerated).
const LOADING_PROBE_MS: u64 = 500;
const LOADING_PROBE_LIMIT: u32 = 10;
/// Hard cap on scroll attempts regardless of progress.
const MAX_SCROLL_ATTEMPTS: u32 = 10;

/// Decides when the backlog scroll loop is done.
///
/// Separate from the loop so the stop rule is testable with synthetic
/// counts: stop as soon as one read repeats the previous read's count, or
/// when the attempt cap is reached, whichever comes first.
#[derive(Debug)]
pub struct ScrollTracker {
    last_count: Option<usize>,
    attempts: u32,
    max_attempts: u32,
}

impl ScrollTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self { last_count: None, attempts: 0, max_attempts }
    }

    /// Record the message count observed after one scroll; `true` means stop.
    pub fn record(&mut self, count: usize) -> bool {
        self.attempts += 1;
        let unchanged = self.last_count == Some(count);
        self.last_count = Some(count);
        if unchanged {
            debug!("scroll backlog settled at {} message(s) after {} attempt(s)", count, self.attempts);
            return true;
        }
        self.attempts >= self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Locates, scrolls and classifies the message list of the active page.
pub struct Extractor {
    book: SelectorBook,
    classifier: Classifier,
    clock: Arc<dyn Clock>,
}

impl Extractor {
    pub fn new(book: SelectorBook, clock: Arc<dyn Clock>) -> Self {
        let classifier = Classifier::new(&book.own_markers);
        Self { book, classifier, clock }
    }

    pub fn book(&self) -> &SelectorBook {
        &self.book
    }

    /// Extract the full visible history of the current conversation page.
    ///
    /// Ordered pipeline: wait for any message element (with one body-probe
    /// fallback round), scroll the backlog in, snapshot the page once, then
    /// run the pure classification pass over the snapshot.
    pub async fn fetch_history(
        &self,
        page: &Page,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ExtractError> {
        self.wait_for_messages(page).await?;
        self.scroll_backlog(page).await?;

        let html = page.content().await?;
        let messages = self.snapshot_pass(&html, conversation_id);
        if messages.is_empty() {
            // The wait succeeded but the final snapshot came up empty — the
            // page re-rendered underneath us. Treat as no chat elements.
            return Err(ExtractError::NoChatElements);
        }
        info!(
            "fetched {} message(s) for conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(messages)
    }

    /// Pure per-snapshot pass: parse → first matching candidate wins →
    /// classify each element by index → dedup → sort ascending.
    pub fn snapshot_pass(&self, html: &str, conversation_id: &str) -> Vec<Message> {
        let now = self.clock.now();
        let doc = Html::parse_document(html);
        let Some(hit) = first_match(&doc, &self.book.messages) else {
            return Vec::new();
        };
        debug!(
            "extraction pass won by candidate #{} ({}) with {} element(s)",
            hit.candidate_index,
            hit.selector,
            hit.elements.len()
        );

        let classified: Vec<Message> = hit
            .elements
            .iter()
            .enumerate()
            .filter_map(|(index, el)| {
                self.classifier.classify(*el, index, conversation_id, now)
            })
            .collect();

        let mut messages = dedup_messages(classified);
        sort_by_timestamp(&mut messages);
        messages
    }

    /// Bounded wait for the first message element. If the whole candidate
    /// list stays empty, fall back to a body-level containment probe plus a
    /// fixed settle delay, then give the candidates one last chance.
    async fn wait_for_messages(&self, page: &Page) -> Result<(), ExtractError> {
        for _ in 0..WAIT_PROBE_LIMIT {
            if self.count_message_elements(page).await? > 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(WAIT_PROBE_MS)).await;
        }

        // Container-detection fallback: the list may render late inside a
        // shell that exists from the start.
        let body_populated = page
            .evaluate("document.body !== null && document.body.children.length > 0")
            .await?
            .into_value::<bool>()
            .unwrap_or(false);
        if body_populated {
            tokio::time::sleep(Duration::from_millis(CONTAINER_SETTLE_MS)).await;
            if self.count_message_elements(page).await? > 0 {
                return Ok(());
            }
        }

        warn!(
            "no message element after {} ms — giving up on this page",
            u64::from(WAIT_PROBE_LIMIT) * WAIT_PROBE_MS + CONTAINER_SETTLE_MS
        );
        Err(ExtractError::NoChatElements)
    }

    /// Scroll the detected container (or the window) to its start until the
    /// message count stops growing or the attempt cap is reached.
    async fn scroll_backlog(&self, page: &Page) -> Result<(), ExtractError> {
        let mut tracker = ScrollTracker::new(MAX_SCROLL_ATTEMPTS);
        loop {
            self.scroll_to_top(page).await?;

            // Sample inside a block so the rng never lives across an await.
            let settle_ms = {
                let mut rng = rand::rng();
                Uniform::new(SCROLL_SETTLE_MIN_MS, SCROLL_SETTLE_MAX_MS)
                    .unwrap()
                    .sample(&mut rng)
            };
            tokio::time::sleep(Duration::from_millis(settle_ms)).await;

            self.wait_loading_gone(page).await;

            let count = self.count_message_elements(page).await?;
            if tracker.record(count) {
                debug!("scroll loop done after {} attempt(s)", tracker.attempts());
                return Ok(());
            }
        }
    }

    async fn scroll_to_top(&self, page: &Page) -> Result<(), ExtractError> {
        let containers = serde_json::to_string(&self.book.containers_css_group())
            .unwrap_or_else(|_| "\"\"".to_string());
        let js = format!(
            "(() => {{ const c = document.querySelector({containers}); \
             if (c) {{ c.scrollTop = 0; return true; }} \
             window.scrollTo(0, 0); return false; }})()"
        );
        page.evaluate(js).await?;
        Ok(())
    }

    /// Wait for any history-loading spinner to disappear. Bounded; a spinner
    /// that never clears is logged and tolerated, never fatal.
    async fn wait_loading_gone(&self, page: &Page) {
        let probe = serde_json::to_string(&LOADING_INDICATOR_CANDIDATES.join(", "))
            .unwrap_or_else(|_| "\"\"".to_string());
        let js = format!("document.querySelector({probe}) !== null");
        for _ in 0..LOADING_PROBE_LIMIT {
            let visible = page
                .evaluate(js.clone())
                .await
                .ok()
                .and_then(|v| v.into_value::<bool>().ok())
                .unwrap_or(false);
            if !visible {
                return;
            }
            tokio::time::sleep(Duration::from_millis(LOADING_PROBE_MS)).await;
        }
        debug!("loading indicator still visible after bounded wait — continuing anyway");
    }

    /// In-page count across the whole candidate group. Used for scroll
    /// progress only; the winning-candidate rule is applied to the final
    /// snapshot, not here.
    async fn count_message_elements(&self, page: &Page) -> Result<usize, ExtractError> {
        let group = serde_json::to_string(&self.book.messages_css_group())
            .unwrap_or_else(|_| "\"\"".to_string());
        let js = format!("document.querySelectorAll({group}).length");
        let count = page
            .evaluate(js)
            .await?
            .into_value::<u64>()
            .unwrap_or(0);
        Ok(count as usize)
    }
}
