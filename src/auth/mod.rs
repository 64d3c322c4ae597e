//! Login flow: session reuse, human-paced credential submission, captcha
//! hand-off, outcome detection and bounded retry.
//!
//! The happy path never types a credential: a stored cookie jar that the
//! site still accepts logs in silently. Only when that fails does the
//! credential path run, and each attempt ends in a race between "the page
//! now looks authenticated" and "the page showed an error banner", with a
//! hard timeout that is reported as its own failure kind. An account-on-hold
//! banner ends everything immediately; no amount of retrying fixes that.

pub mod captcha;

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Page;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::probe::{current_url, first_present, first_text, wait_for_first};
use crate::chat::selectors::{
    CAPTCHA_CANDIDATES, CAPTCHA_INPUT_CANDIDATES, DASHBOARD_MARKUP_CANDIDATES,
    EMAIL_INPUT_CANDIDATES, LOGIN_ERROR_CANDIDATES, LOGIN_SUBMIT_CANDIDATES,
    PASSWORD_INPUT_CANDIDATES,
};
use crate::core::config::ScoutConfig;
use crate::core::error::AuthError;
use crate::session::{cookies, SessionStore};
use crate::stealth::{typing, PacingPolicy};

pub use captcha::SolverClient;

const FORM_PROBE_LIMIT: u32 = 20;
const OUTCOME_PROBE_MS: u64 = 500;

/// Phrase that marks the non-retryable account state in error markup.
const ON_HOLD_MARKER: &str = "on hold";

/// How a successful login was achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    ReusedSession,
    Credentials,
}

pub struct Authenticator {
    login_url: String,
    chat_url: String,
    logged_in_markers: Vec<String>,
    domain: String,
    email: Option<String>,
    password: Option<String>,
    max_attempts: u32,
    retry_base: Duration,
    outcome_timeout: Duration,
    store: Arc<SessionStore>,
    solver: SolverClient,
    pacing: Arc<dyn PacingPolicy>,
}

impl Authenticator {
    pub fn new(
        config: &ScoutConfig,
        store: Arc<SessionStore>,
        solver: SolverClient,
        pacing: Arc<dyn PacingPolicy>,
    ) -> Self {
        Self {
            login_url: config.site.resolve_login_url(),
            chat_url: config.site.resolve_chat_url(),
            logged_in_markers: config.site.resolve_logged_in_markers(),
            domain: config.site.resolve_domain(),
            email: config.auth.resolve_email(),
            password: config.auth.resolve_password(),
            max_attempts: config.auth.resolve_max_attempts(),
            retry_base: Duration::from_millis(config.auth.resolve_retry_base_ms()),
            outcome_timeout: Duration::from_millis(config.auth.resolve_outcome_timeout_ms()),
            store,
            solver,
            pacing,
        }
    }

    /// Log the account in on `page`, reusing the stored session when the
    /// site still accepts it. Every success lands a snapshot in the session
    /// document under a fresh id.
    pub async fn login(&self, page: &Page) -> Result<LoginMethod, AuthError> {
        if self.try_reuse_session(page).await {
            self.record_session(LoginMethod::ReusedSession);
            return Ok(LoginMethod::ReusedSession);
        }

        if self.email.is_none() || self.password.is_none() {
            return Err(AuthError::MissingCredentials);
        }

        run_with_retry(self.max_attempts, self.retry_base, |attempt| {
            self.credential_attempt(page, attempt)
        })
        .await?;

        self.record_session(LoginMethod::Credentials);
        Ok(LoginMethod::Credentials)
    }

    /// Write the per-login snapshot: a fresh session id mapped to how the
    /// session was established and what it targets. Credentials never go in.
    fn record_session(&self, method: LoginMethod) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.store.save_session_snapshot(
            &session_id,
            json!({
                "method": match method {
                    LoginMethod::ReusedSession => "reused_session",
                    LoginMethod::Credentials => "credentials",
                },
                "domain": self.domain,
                "chatUrl": self.chat_url,
            }),
        );
        debug!("auth: session '{}' recorded ({:?})", session_id, method);
        session_id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session reuse
    // ─────────────────────────────────────────────────────────────────────

    async fn try_reuse_session(&self, page: &Page) -> bool {
        let Some(doc) = self.store.load_cookies() else {
            debug!("auth: no stored session — fresh login required");
            return false;
        };

        info!("auth: trying stored session for '{}'", doc.domain);
        if cookies::inject(page, &doc.cookies).await == 0 {
            return false;
        }

        if let Err(e) = page.goto(&self.chat_url).await {
            warn!("auth: navigation with stored session failed: {}", e);
            return false;
        }
        self.settle(800, 1500).await;

        if self.logged_in(page).await {
            info!("auth: ✅ stored session accepted — credential login skipped");
            return true;
        }

        info!("auth: stored session rejected by the site — discarding");
        self.store.clear_cookies();
        false
    }

    // ─────────────────────────────────────────────────────────────────────
    // Credential path
    // ─────────────────────────────────────────────────────────────────────

    async fn credential_attempt(&self, page: &Page, attempt: u32) -> AttemptOutcome {
        info!(
            "auth: credential login attempt {}/{}",
            attempt, self.max_attempts
        );
        match self.credential_attempt_inner(page).await {
            Ok(()) => AttemptOutcome::Success,
            Err(AuthError::AccountOnHold) => AttemptOutcome::Fatal(AuthError::AccountOnHold),
            Err(e) => AttemptOutcome::Retry(e),
        }
    }

    async fn credential_attempt_inner(&self, page: &Page) -> Result<(), AuthError> {
        page.goto(&self.login_url).await?;
        self.settle(800, 1500).await;

        // A session that is still live server-side bounces the login URL
        // straight to the dashboard.
        if self.logged_in(page).await {
            info!("auth: login page redirected to an authenticated view");
            self.persist_session(page).await;
            return Ok(());
        }

        let email_sel = wait_for_first(page, EMAIL_INPUT_CANDIDATES, FORM_PROBE_LIMIT)
            .await
            .ok_or(AuthError::MissingForm)?;
        let password_sel = wait_for_first(page, PASSWORD_INPUT_CANDIDATES, 2)
            .await
            .ok_or(AuthError::MissingForm)?;

        let email = self.email.as_deref().ok_or(AuthError::MissingCredentials)?;
        let password = self
            .password
            .as_deref()
            .ok_or(AuthError::MissingCredentials)?;

        typing::fill_field(page, email_sel, email, self.pacing.as_ref()).await?;
        self.settle(200, 600).await;
        typing::fill_field(page, password_sel, password, self.pacing.as_ref()).await?;

        self.handle_captcha(page).await;

        match first_present(page, LOGIN_SUBMIT_CANDIDATES).await {
            Some(submit_sel) => {
                typing::human_click(page, submit_sel, self.pacing.as_ref()).await?;
            }
            None => {
                debug!("auth: no submit control matched — pressing Enter");
                typing::press_enter(page).await?;
            }
        }

        self.await_outcome(page).await?;
        self.persist_session(page).await;
        Ok(())
    }

    /// Race the success signals (authenticated URL, dashboard markup)
    /// against a visible error banner, bounded by the outcome timeout.
    async fn await_outcome(&self, page: &Page) -> Result<(), AuthError> {
        let start = tokio::time::Instant::now();

        while start.elapsed() < self.outcome_timeout {
            tokio::time::sleep(Duration::from_millis(OUTCOME_PROBE_MS)).await;

            if self.logged_in(page).await {
                return Ok(());
            }

            if let Some(text) = first_text(page, LOGIN_ERROR_CANDIDATES).await {
                if text.to_lowercase().contains(ON_HOLD_MARKER) {
                    return Err(AuthError::AccountOnHold);
                }
                return Err(AuthError::ErrorElement(text));
            }
        }

        Err(AuthError::OutcomeTimeout {
            waited_ms: self.outcome_timeout.as_millis() as u64,
        })
    }

    async fn logged_in(&self, page: &Page) -> bool {
        let url = current_url(page).await;
        if self
            .logged_in_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
        {
            return true;
        }
        first_present(page, DASHBOARD_MARKUP_CANDIDATES).await.is_some()
    }

    async fn persist_session(&self, page: &Page) {
        match cookies::capture(page).await {
            Ok(raw) if !raw.is_empty() => self.store.save_cookies(raw, &self.domain),
            Ok(_) => warn!("auth: login succeeded but the cookie jar came back empty"),
            Err(e) => warn!("auth: cookie capture failed: {}", e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Captcha
    // ─────────────────────────────────────────────────────────────────────

    /// Best-effort: a failed solve logs and falls through to the submit,
    /// leaving the final verdict to the standard outcome race.
    async fn handle_captcha(&self, page: &Page) {
        let Some(sel) = first_present(page, CAPTCHA_CANDIDATES).await else {
            return;
        };
        info!("auth: captcha detected via '{}'", sel);

        if is_image_captcha(sel) {
            self.solve_image_captcha(page, sel).await;
        } else if let Err(e) = typing::human_click(page, sel, self.pacing.as_ref()).await {
            // Checkbox / challenge widgets verify themselves after a click.
            warn!("auth: captcha click failed: {} — continuing without", e);
        }
    }

    async fn solve_image_captcha(&self, page: &Page, selector: &str) {
        if !self.solver.configured() {
            warn!("auth: image captcha present but no solver configured — continuing without");
            return;
        }

        let image = match captcha_screenshot(page, selector).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("auth: captcha screenshot failed: {} — continuing without", e);
                return;
            }
        };

        match self.solver.solve(&image).await {
            Ok(solution) => {
                let Some(input_sel) = first_present(page, CAPTCHA_INPUT_CANDIDATES).await else {
                    warn!("auth: captcha solved but no answer field matched");
                    return;
                };
                if let Err(e) =
                    typing::fill_field(page, input_sel, &solution, self.pacing.as_ref()).await
                {
                    warn!("auth: typing captcha solution failed: {}", e);
                }
            }
            Err(e) => warn!("auth: captcha solve failed: {} — continuing without", e),
        }
    }

    async fn settle(&self, min_ms: u64, max_ms: u64) {
        let ms = self.pacing.settle_ms(min_ms, max_ms);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Retry engine
// ─────────────────────────────────────────────────────────────────────────

enum AttemptOutcome {
    Success,
    Retry(AuthError),
    Fatal(AuthError),
}

/// Bounded retry with exponential backoff: base × 2^(attempt−1) between
/// attempts. `Fatal` short-circuits immediately; exhausting every attempt
/// reports `LoginFailed` carrying the last per-attempt error.
async fn run_with_retry<F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut attempt: F,
) -> Result<(), AuthError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome>,
{
    let max_attempts = max_attempts.max(1);
    let mut last = String::new();

    for n in 1..=max_attempts {
        match attempt(n).await {
            AttemptOutcome::Success => return Ok(()),
            AttemptOutcome::Fatal(e) => return Err(e),
            AttemptOutcome::Retry(e) => {
                warn!("auth: attempt {}/{} failed: {}", n, max_attempts, e);
                last = e.to_string();
                if n < max_attempts {
                    let delay = base_delay * 2u32.pow(n - 1);
                    debug!("auth: backing off {:?} before attempt {}", delay, n + 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(AuthError::LoginFailed {
        attempts: max_attempts,
        last,
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Captcha probes
// ─────────────────────────────────────────────────────────────────────────

async fn captcha_screenshot(
    page: &Page,
    selector: &str,
) -> Result<Vec<u8>, chromiumoxide::error::CdpError> {
    let element = page.find_element(selector).await?;
    element.screenshot(CaptureScreenshotFormat::Png).await
}

fn is_image_captcha(selector: &str) -> bool {
    selector.starts_with("img") || selector.contains("image")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn image_captchas_are_told_apart_from_challenge_widgets() {
        assert!(is_image_captcha("img.captcha-image"));
        assert!(!is_image_captcha("iframe[src*='recaptcha']"));
        assert!(!is_image_captcha(".g-recaptcha"));
        assert!(!is_image_captcha("#captcha"));
    }

    #[tokio::test]
    async fn retry_backs_off_and_succeeds_on_the_third_attempt() {
        let calls = AtomicU32::new(0);
        let base = Duration::from_millis(20);
        let start = std::time::Instant::now();

        let result = run_with_retry(3, base, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    AttemptOutcome::Retry(AuthError::OutcomeTimeout { waited_ms: 1 })
                } else {
                    AttemptOutcome::Success
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoffs happened: base and 2×base.
        assert!(start.elapsed() >= base + base * 2);
    }

    #[tokio::test]
    async fn account_on_hold_short_circuits_without_backoff() {
        let calls = AtomicU32::new(0);
        let start = std::time::Instant::now();

        let result = run_with_retry(3, Duration::from_millis(200), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Fatal(AuthError::AccountOnHold) }
        })
        .await;

        assert!(matches!(result, Err(AuthError::AccountOnHold)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let result = run_with_retry(2, Duration::from_millis(1), |n| async move {
            AttemptOutcome::Retry(AuthError::ErrorElement(format!("rejected #{}", n)))
        })
        .await;

        match result {
            Err(AuthError::LoginFailed { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.contains("rejected #2"));
            }
            other => panic!("expected LoginFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_attempts_is_clamped_to_one() {
        let calls = AtomicU32::new(0);
        let _ = run_with_retry(0, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Retry(AuthError::MissingForm) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_successful_login_lands_a_session_snapshot() {
        use crate::core::clock::FixedClock;
        use chrono::TimeZone;

        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(
            dir.path().to_path_buf(),
            7,
            Arc::new(FixedClock(
                chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            )),
        ));
        let config = ScoutConfig::default();
        let auth = Authenticator::new(
            &config,
            store.clone(),
            SolverClient::new(&config.solver),
            Arc::new(crate::stealth::InstantPacing),
        );

        let id = auth.record_session(LoginMethod::Credentials);
        let record = store
            .load_session_snapshot(&id)
            .expect("snapshot should be on disk");
        assert_eq!(record.payload["method"], "credentials");
        assert!(record.payload["domain"].is_string());

        // Each login gets its own id; the reused path records too.
        let reused_id = auth.record_session(LoginMethod::ReusedSession);
        assert_ne!(reused_id, id);
        let record = store
            .load_session_snapshot(&reused_id)
            .expect("reused-session snapshot should be on disk");
        assert_eq!(record.payload["method"], "reused_session");
    }
}
