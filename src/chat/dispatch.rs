//! Compose-and-send flow for one conversation.
//!
//! Sending is UI-only: the message counts as dispatched once the compose
//! box has been filled and the send control activated. No delivery receipt
//! exists on the wire we drive, so the returned [`Message`] is a local echo
//! (`sender = "me"`, current timestamp) that the caller appends to history.

use std::sync::Arc;

use chromiumoxide::Page;
use tracing::{debug, info};
use uuid::Uuid;

use crate::browser::probe::{first_present, wait_for_first};
use crate::chat::classify;
use crate::chat::selectors::SelectorBook;
use crate::core::clock::Clock;
use crate::core::error::SendError;
use crate::core::types::{Message, MessageKind};
use crate::stealth::{typing, PacingPolicy};

/// Probes of the compose-input chain before giving up (500 ms cadence).
const COMPOSE_PROBE_LIMIT: u32 = 6;

pub struct Dispatcher {
    book: SelectorBook,
    clock: Arc<dyn Clock>,
    pacing: Arc<dyn PacingPolicy>,
}

impl Dispatcher {
    pub fn new(book: SelectorBook, clock: Arc<dyn Clock>, pacing: Arc<dyn PacingPolicy>) -> Self {
        Self { book, clock, pacing }
    }

    /// Type `text` into the conversation's compose box and activate send.
    ///
    /// Any draft already sitting in the box is cleared first (select-all,
    /// then typed over). When no send control matches the fallback chain,
    /// Enter is pressed instead — most chat composers treat that as send.
    pub async fn send(
        &self,
        page: &Page,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, SendError> {
        let input_sel = wait_for_first(page, &self.book.compose_inputs, COMPOSE_PROBE_LIMIT)
            .await
            .ok_or(SendError::MissingInput)?;
        debug!("dispatch: compose input matched '{}'", input_sel);

        typing::fill_field(page, input_sel, text, self.pacing.as_ref()).await?;
        self.settle(200, 500).await;

        match first_present(page, &self.book.send_buttons).await {
            Some(send_sel) => {
                debug!("dispatch: clicking send control '{}'", send_sel);
                typing::human_click(page, send_sel, self.pacing.as_ref()).await?;
            }
            None => {
                debug!("dispatch: no send control matched — pressing Enter");
                typing::press_enter(page).await?;
            }
        }

        // Give the site a beat to take the text out of the box.
        self.settle(400, 900).await;

        info!(
            "dispatch: ✉️ sent {} chars to conversation '{}'",
            text.chars().count(),
            conversation_id
        );
        Ok(self.local_echo(conversation_id, text))
    }

    /// The record we keep for a message this bot just sent. There is no DOM
    /// element to classify, so the fields are synthesized locally.
    fn local_echo(&self, conversation_id: &str, text: &str) -> Message {
        let now = self.clock.now();
        let (contains_links, contains_mentions) = classify::content_flags(text);
        Message {
            id: format!("sent-{}", Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            sender: "me".to_string(),
            kind: MessageKind::Sent,
            timestamp: now,
            element_class: String::new(),
            contains_links,
            contains_mentions,
        }
    }

    async fn settle(&self, min_ms: u64, max_ms: u64) {
        let ms = self.pacing.settle_ms(min_ms, max_ms);
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::stealth::InstantPacing;
    use chrono::{TimeZone, Utc};

    fn dispatcher() -> Dispatcher {
        let pinned = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        Dispatcher::new(
            SelectorBook::default(),
            Arc::new(FixedClock(pinned)),
            Arc::new(InstantPacing),
        )
    }

    #[test]
    fn local_echo_is_an_own_message_with_the_clock_timestamp() {
        let echo = dispatcher().local_echo("conv-9", "hello there");
        assert!(echo.is_own());
        assert_eq!(echo.sender, "me");
        assert_eq!(echo.conversation_id, "conv-9");
        assert_eq!(echo.timestamp.timestamp(), 1741944413);
        assert!(echo.id.starts_with("sent-"));
    }

    #[test]
    fn local_echo_flags_links_and_mentions() {
        let d = dispatcher();
        let linky = d.local_echo("c", "portfolio: https://example.dev/work");
        assert!(linky.contains_links);
        assert!(!linky.contains_mentions);

        let mentiony = d.local_echo("c", "thanks @hiring_team");
        assert!(mentiony.contains_mentions);
        assert!(!mentiony.contains_links);
    }
}
