use thiserror::Error;

/// Failures surfaced by the login flow.
///
/// `AccountOnHold` is terminal and must never be retried; everything else is
/// fair game for the bounded retry loop, which reports exhaustion as
/// `LoginFailed` carrying the last underlying cause. A timed-out outcome race
/// and a detected error element are deliberately distinct variants so logs can
/// tell "the page never answered" apart from "the page said no".
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login form not found — no email/password candidate matched within the wait budget")]
    MissingForm,

    #[error("no credentials configured; set auth.email and auth.password or the matching environment variables")]
    MissingCredentials,

    #[error("account is on hold; login is terminal and will not be retried")]
    AccountOnHold,

    #[error("login failed after {attempts} attempts: {last}")]
    LoginFailed { attempts: u32, last: String },

    #[error("login rejected by the page: {0}")]
    ErrorElement(String),

    #[error("no login outcome within {waited_ms} ms")]
    OutcomeTimeout { waited_ms: u64 },

    #[error("browser error during login: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for AuthError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(e.to_string())
    }
}

/// Failures surfaced by conversation extraction and the live watch.
///
/// An exhausted wait is not its own kind: a page that never produced a
/// message element reports `NoChatElements` whether it answered instantly
/// or ran the probe budget down.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no chat elements found — every message candidate came up empty")]
    NoChatElements,

    #[error("browser error during extraction: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for ExtractError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(e.to_string())
    }
}

/// Failures surfaced by the message dispatcher.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("compose input not found — no candidate matched")]
    MissingInput,

    #[error("browser error during send: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for SendError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(e.to_string())
    }
}

/// Failures from the remote captcha-solving client. All of these are
/// non-fatal to login: the caller logs and proceeds without a solution.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha unsolved: {0}")]
    Unsolved(String),

    #[error("solver did not produce a solution within {budget_secs} s")]
    PollBudgetExhausted { budget_secs: u64 },

    #[error("solver transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures from the remote listings job API.
#[derive(Debug, Error)]
pub enum JobsError {
    #[error("listings API not configured; set listings.api_url or LISTINGS_API_URL")]
    NotConfigured,

    #[error("listings job '{job_id}' did not finish within {budget_secs} s")]
    PollBudgetExhausted { job_id: String, budget_secs: u64 },

    #[error("listings job failed: {0}")]
    JobFailed(String),

    #[error("listings transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_failures_name_their_cause() {
        assert_eq!(
            ExtractError::NoChatElements.to_string(),
            "no chat elements found — every message candidate came up empty"
        );
        assert!(ExtractError::Browser("tab crashed".into())
            .to_string()
            .contains("tab crashed"));
    }
}
