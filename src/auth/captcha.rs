//! Thin client for the external captcha-solving service.
//!
//! Protocol: POST the challenge image (base64 PNG) to the configured
//! endpoint, receive a task id, then poll `GET {api_url}/{task_id}` until
//! the service reports a solution. Polling runs on a fixed interval with a
//! hard total budget; when the budget runs out the solve fails and the
//! caller decides whether that is fatal (login treats it as best-effort).

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

use crate::core::config::SolverConfig;
use crate::core::error::CaptchaError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_BUDGET: Duration = Duration::from_secs(120);

const API_KEY_HEADER: &str = "X-Api-Key";

/// Correlates one submitted challenge to its polling id. Never persisted.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub id: String,
}

pub struct SolverClient {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    poll_interval: Duration,
    poll_budget: Duration,
}

impl SolverClient {
    pub fn new(config: &SolverConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.resolve_api_url(),
            api_key: config.resolve_api_key(),
            poll_interval: POLL_INTERVAL,
            poll_budget: POLL_BUDGET,
        }
    }

    /// Override the poll cadence. The production schedule is fixed; this
    /// exists so tests can run the full loop without real waits.
    pub fn with_poll_timing(mut self, interval: Duration, budget: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_budget = budget;
        self
    }

    /// Whether a solver endpoint was configured at all.
    pub fn configured(&self) -> bool {
        self.api_url.is_some()
    }

    /// Submit an image challenge and wait for its solution.
    pub async fn solve(&self, image_png: &[u8]) -> Result<String, CaptchaError> {
        let task = self.submit(image_png).await?;
        info!("captcha: task '{}' submitted, polling for solution", task.id);

        let start = tokio::time::Instant::now();
        loop {
            if start.elapsed() >= self.poll_budget {
                return Err(CaptchaError::PollBudgetExhausted {
                    budget_secs: self.poll_budget.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            match self.poll(&task).await? {
                PollOutcome::Solved(solution) => {
                    info!("captcha: task '{}' solved", task.id);
                    return Ok(solution);
                }
                PollOutcome::Failed(reason) => return Err(CaptchaError::Unsolved(reason)),
                PollOutcome::Pending => {
                    debug!("captcha: task '{}' still pending", task.id);
                }
            }
        }
    }

    async fn submit(&self, image_png: &[u8]) -> Result<CaptchaTask, CaptchaError> {
        let api_url = self
            .api_url
            .as_deref()
            .ok_or_else(|| CaptchaError::Unsolved("solver api url not configured".into()))?;

        let body = serde_json::json!({
            "type": "image",
            "image": BASE64.encode(image_png),
        });

        let mut request = self.client.post(api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?.error_for_status()?;
        let submitted: SubmitResponse = response.json().await?;
        Ok(CaptchaTask {
            id: submitted.task_id,
        })
    }

    async fn poll(&self, task: &CaptchaTask) -> Result<PollOutcome, CaptchaError> {
        let api_url = self
            .api_url
            .as_deref()
            .ok_or_else(|| CaptchaError::Unsolved("solver api url not configured".into()))?;

        let url = format!("{}/{}", api_url.trim_end_matches('/'), task.id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?.error_for_status()?;
        let status: StatusResponse = response.json().await?;
        Ok(interpret(status))
    }
}

enum PollOutcome {
    Pending,
    Solved(String),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "taskId", alias = "id")]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default, alias = "text")]
    solution: Option<String>,
}

fn interpret(status: StatusResponse) -> PollOutcome {
    match status.status.as_str() {
        "solved" | "ready" | "completed" => match status.solution {
            Some(s) if !s.is_empty() => PollOutcome::Solved(s),
            _ => PollOutcome::Failed("solver reported success without a solution".into()),
        },
        "failed" | "error" | "unsolvable" => {
            PollOutcome::Failed(format!("solver reported status '{}'", status.status))
        }
        _ => PollOutcome::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: &str, solution: Option<&str>) -> StatusResponse {
        StatusResponse {
            status: status.to_string(),
            solution: solution.map(|s| s.to_string()),
        }
    }

    #[test]
    fn solved_with_text_yields_the_solution() {
        match interpret(status("solved", Some("XK4F9"))) {
            PollOutcome::Solved(s) => assert_eq!(s, "XK4F9"),
            _ => panic!("expected solved"),
        }
    }

    #[test]
    fn solved_without_text_is_a_failure() {
        assert!(matches!(
            interpret(status("solved", None)),
            PollOutcome::Failed(_)
        ));
        assert!(matches!(
            interpret(status("completed", Some(""))),
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn unknown_statuses_keep_polling() {
        assert!(matches!(
            interpret(status("pending", None)),
            PollOutcome::Pending
        ));
        assert!(matches!(
            interpret(status("processing", None)),
            PollOutcome::Pending
        ));
    }

    #[test]
    fn failure_statuses_stop_the_loop() {
        assert!(matches!(
            interpret(status("failed", None)),
            PollOutcome::Failed(_)
        ));
        assert!(matches!(
            interpret(status("unsolvable", Some("ignored"))),
            PollOutcome::Failed(_)
        ));
    }
}
