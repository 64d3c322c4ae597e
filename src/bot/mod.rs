//! The orchestrator: owns the browser session and composes login,
//! extraction, dispatch and the live watch into the operations the CLI and
//! tool surface expose.
//!
//! One bot instance drives one logged-in tab. Every page-touching operation
//! takes the session lock for its whole duration, so login, extraction and
//! sends are strictly serialized — the page is never shared mid-flight.
//! Store-only operations (status, search, conversation listing) bypass the
//! lock and stay responsive while a live watch holds it.

use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::Page;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::auth::{Authenticator, LoginMethod, SolverClient};
use crate::browser::{self, probe, BotBrowser};
use crate::chat::selectors::SelectorBook;
use crate::chat::{classify, Dispatcher, Extractor, LiveWatch};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::ScoutConfig;
use crate::core::types::{BotStatus, ConversationSummary, Message};
use crate::session::SessionStore;
use crate::stealth::{HumanPacing, PacingPolicy};

/// Characters of the latest message shown in conversation listings.
const PREVIEW_CHARS: usize = 80;

/// Where the bot is in its lifecycle, as reported by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotState {
    Idle,
    Authenticating,
    Ready,
    Listening,
}

impl BotState {
    fn as_str(self) -> &'static str {
        match self {
            BotState::Idle => "idle",
            BotState::Authenticating => "authenticating",
            BotState::Ready => "ready",
            BotState::Listening => "listening",
        }
    }
}

#[derive(Debug)]
struct Flags {
    state: BotState,
    logged_in: bool,
    watching: Option<String>,
}

/// The logged-in tab, guarded by the session lock.
#[derive(Default)]
struct SessionCell {
    page: Option<Page>,
    login: Option<LoginMethod>,
}

pub struct InboxBot {
    config: ScoutConfig,
    browser: Arc<BotBrowser>,
    store: Arc<SessionStore>,
    auth: Authenticator,
    extractor: Extractor,
    dispatcher: Dispatcher,
    watcher: LiveWatch,
    session: Mutex<SessionCell>,
    watch_cancel: StdMutex<Option<watch::Sender<bool>>>,
    flags: RwLock<Flags>,
}

impl InboxBot {
    /// Bot with production timing (human-paced input, system clock).
    pub fn new(config: ScoutConfig, headless: bool) -> Result<Self> {
        Self::with_parts(
            config,
            headless,
            Arc::new(SystemClock),
            Arc::new(HumanPacing),
        )
    }

    /// Bot with injected timing seams — tests pin the clock and drop the
    /// human pacing to zero.
    pub fn with_parts(
        config: ScoutConfig,
        headless: bool,
        clock: Arc<dyn Clock>,
        pacing: Arc<dyn PacingPolicy>,
    ) -> Result<Self> {
        let browser = BotBrowser::new_auto(headless).ok_or_else(|| {
            anyhow!(
                "no Chromium-family browser found — install Chrome/Chromium or point CHROME_EXECUTABLE at one"
            )
        })?;
        let store = Arc::new(SessionStore::new(
            config.storage.resolve_data_dir(),
            config.storage.resolve_session_max_age_days(),
            clock.clone(),
        ));
        let solver = SolverClient::new(&config.solver);
        let auth = Authenticator::new(&config, store.clone(), solver, pacing.clone());

        let book = SelectorBook::from_overrides(&config.selectors);
        let extractor = Extractor::new(book.clone(), clock.clone());
        let dispatcher = Dispatcher::new(book.clone(), clock.clone(), pacing);
        let watcher = LiveWatch::new(book, clock);

        Ok(Self {
            config,
            browser,
            store,
            auth,
            extractor,
            dispatcher,
            watcher,
            session: Mutex::new(SessionCell::default()),
            watch_cancel: StdMutex::new(None),
            flags: RwLock::new(Flags {
                state: BotState::Idle,
                logged_in: false,
                watching: None,
            }),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────
    // Page-touching operations (serialized by the session lock)
    // ─────────────────────────────────────────────────────────────────────

    /// Make sure the account is logged in; reports how.
    pub async fn login(&self) -> Result<LoginMethod> {
        let mut cell = self.session.lock().await;
        self.ready_page(&mut cell).await?;
        cell.login
            .ok_or_else(|| anyhow!("login finished without a method recorded"))
    }

    /// One-shot extraction of a conversation's visible history. The full
    /// result replaces the persisted history; `limit` trims the *returned*
    /// set to the most recent N without touching what was persisted.
    pub async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let mut cell = self.session.lock().await;
        let page = self.ready_page(&mut cell).await?;
        self.open_conversation(&page, conversation_id).await?;

        let messages = self
            .extractor
            .fetch_history(&page, conversation_id)
            .await
            .with_context(|| format!("extracting conversation '{conversation_id}'"))?;
        self.store.save_history(conversation_id, messages.clone());
        Ok(tail(messages, limit))
    }

    /// Send one message and append its local echo to the history.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message> {
        let mut cell = self.session.lock().await;
        let page = self.ready_page(&mut cell).await?;
        self.open_conversation(&page, conversation_id).await?;

        let echo = self
            .dispatcher
            .send(&page, conversation_id, text)
            .await
            .with_context(|| format!("sending to conversation '{conversation_id}'"))?;
        self.store.append_message(conversation_id, echo.clone());
        Ok(echo)
    }

    /// Watch a conversation for incoming messages, persisting each one.
    ///
    /// Runs until `duration` elapses, [`stop_watch`](Self::stop_watch) is
    /// called, or — with no duration — indefinitely. Returns the messages
    /// that were new (post-dedup) during the watch.
    pub async fn listen_live(
        &self,
        conversation_id: &str,
        duration: Option<Duration>,
    ) -> Result<Vec<Message>> {
        let mut cell = self.session.lock().await;
        let page = self.ready_page(&mut cell).await?;
        self.open_conversation(&page, conversation_id).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.watch_cancel.lock().unwrap() = Some(cancel_tx.clone());
        self.set_flags(BotState::Listening, Some(conversation_id.to_string()));

        // Persistence runs off-loop so a slow disk never stalls a poll cycle.
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<Message>();
        let store = self.store.clone();
        let conv = conversation_id.to_string();
        let drain = tokio::spawn(async move {
            let mut picked = Vec::new();
            while let Some(msg) = sink_rx.recv().await {
                if store.append_message(&conv, msg.clone()) {
                    picked.push(msg);
                }
            }
            picked
        });

        let run = self.watcher.run(&page, conversation_id, cancel_rx, sink_tx);
        tokio::pin!(run);

        let outcome = match duration {
            Some(dur) => {
                tokio::select! {
                    res = &mut run => res,
                    _ = tokio::time::sleep(dur) => {
                        // Flag-based cancellation: let the loop notice and
                        // finish its cycle instead of dropping it mid-flight.
                        let _ = cancel_tx.send(true);
                        run.await
                    }
                }
            }
            None => run.await,
        };

        *self.watch_cancel.lock().unwrap() = None;
        self.set_flags(BotState::Ready, None);
        outcome?;

        let picked = drain.await.unwrap_or_default();
        info!(
            "bot: live watch over '{}' ended with {} new message(s)",
            conversation_id,
            picked.len()
        );
        Ok(picked)
    }

    /// Close the tab and the browser process. Any active watch is cancelled
    /// first; this waits for it to wind down.
    pub async fn shutdown(&self) {
        self.stop_watch();
        let mut cell = self.session.lock().await;
        cell.page = None;
        cell.login = None;
        self.browser.shutdown().await;
        self.set_flags(BotState::Idle, None);
        self.flags.write().unwrap().logged_in = false;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Store-only operations (no session lock, usable mid-watch)
    // ─────────────────────────────────────────────────────────────────────

    /// Ask an active live watch to stop after its current cycle. No-op when
    /// nothing is watching.
    pub fn stop_watch(&self) {
        if let Some(tx) = self.watch_cancel.lock().unwrap().take() {
            info!("bot: stop requested — cancelling live watch");
            let _ = tx.send(true);
        }
    }

    /// Known conversations, newest activity first.
    pub fn conversations(&self, limit: Option<usize>) -> Vec<ConversationSummary> {
        let mut rows: Vec<ConversationSummary> = self
            .store
            .history()
            .into_iter()
            .map(|(conversation_id, record)| ConversationSummary {
                conversation_id,
                message_count: record.message_count,
                last_updated: record.last_updated,
                last_message: record
                    .messages
                    .last()
                    .map(|m| m.text.chars().take(PREVIEW_CHARS).collect()),
            })
            .collect();
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        if let Some(n) = limit {
            rows.truncate(n);
        }
        rows
    }

    /// Case-insensitive substring search over persisted history, optionally
    /// scoped to one conversation. Hits come back oldest-first.
    pub fn search_messages(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<Message> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Message> = self
            .store
            .history()
            .into_iter()
            .filter(|(id, _)| conversation_id.map_or(true, |want| id == want))
            .flat_map(|(_, record)| record.messages)
            .filter(|m| m.text.to_lowercase().contains(&needle))
            .collect();
        classify::sort_by_timestamp(&mut hits);
        if let Some(n) = limit {
            hits.truncate(n);
        }
        hits
    }

    pub fn status(&self) -> BotStatus {
        let flags = self.flags.read().unwrap();
        BotStatus {
            state: flags.state.as_str().to_string(),
            logged_in: flags.logged_in,
            watching: flags.watching.clone(),
            stats: self.store.stats(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// The logged-in tab, creating browser/tab/session as needed. A dead tab
    /// (crashed renderer, closed window) is detected here and rebuilt, which
    /// includes logging back in.
    async fn ready_page(&self, cell: &mut SessionCell) -> Result<Page> {
        if let Some(page) = &cell.page {
            if page.evaluate("document.readyState").await.is_ok() {
                return Ok(page.clone());
            }
            warn!("bot: active tab no longer responds — rebuilding the session");
            cell.page = None;
            cell.login = None;
        }

        self.set_flags(BotState::Authenticating, None);
        let page = self.browser.acquire_page().await?;
        let method = self
            .auth
            .login(&page)
            .await
            .context("logging in to the chat platform")?;
        info!("bot: ✅ logged in ({:?})", method);

        cell.page = Some(page.clone());
        cell.login = Some(method);
        {
            let mut flags = self.flags.write().unwrap();
            flags.state = BotState::Ready;
            flags.logged_in = true;
            flags.watching = None;
        }
        Ok(page)
    }

    async fn open_conversation(&self, page: &Page, conversation_id: &str) -> Result<()> {
        let url = self.config.site.resolve_conversation_url(conversation_id);
        if probe::current_url(page).await != url {
            page.goto(&url)
                .await
                .with_context(|| format!("opening conversation '{conversation_id}'"))?;
            browser::wait_until_stable(page, 1500, 10_000).await;
        }
        Ok(())
    }

    fn set_flags(&self, state: BotState, watching: Option<String>) {
        let mut flags = self.flags.write().unwrap();
        flags.state = state;
        flags.watching = watching;
    }
}

/// Most recent `limit` entries of an ascending-sorted set.
fn tail(mut messages: Vec<Message>, limit: Option<usize>) -> Vec<Message> {
    if let Some(n) = limit {
        if messages.len() > n {
            return messages.split_off(messages.len() - n);
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageKind;
    use chrono::{TimeZone, Utc};

    fn msg(text: &str, secs: i64) -> Message {
        Message {
            id: format!("m-{secs}"),
            conversation_id: "c1".to_string(),
            text: text.to_string(),
            sender: "other".to_string(),
            kind: MessageKind::Received,
            timestamp: Utc.timestamp_opt(1_740_000_000 + secs, 0).unwrap(),
            element_class: String::new(),
            contains_links: false,
            contains_mentions: false,
        }
    }

    #[test]
    fn tail_keeps_the_most_recent_messages() {
        let set = vec![msg("a", 0), msg("b", 60), msg("c", 120)];
        let trimmed = tail(set.clone(), Some(2));
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].text, "b");
        assert_eq!(trimmed[1].text, "c");

        assert_eq!(tail(set.clone(), None).len(), 3);
        assert_eq!(tail(set, Some(10)).len(), 3);
    }

    #[test]
    fn bot_states_have_stable_names() {
        assert_eq!(BotState::Idle.as_str(), "idle");
        assert_eq!(BotState::Authenticating.as_str(), "authenticating");
        assert_eq!(BotState::Ready.as_str(), "ready");
        assert_eq!(BotState::Listening.as_str(), "listening");
    }
}
