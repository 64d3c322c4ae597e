//! Thin client for the external listings job API.
//!
//! The service scrapes internship listings out-of-band: we submit a job,
//! poll until it finishes, and pass the records through untouched. No
//! parsing beyond deserialization happens here — the service owns the
//! extraction, this crate only owns the chat inbox.

use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::ListingsConfig;
use crate::core::error::JobsError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const POLL_BUDGET: Duration = Duration::from_secs(120);

const API_KEY_HEADER: &str = "X-Api-Key";

/// One listing record, exactly as the service reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub stipend: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct ListingsClient {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    poll_interval: Duration,
    poll_budget: Duration,
}

impl ListingsClient {
    pub fn new(config: &ListingsConfig) -> Self {
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

    /// Override the poll cadence so tests can run the full loop without
    /// real waits.
    pub fn with_poll_timing(mut self, interval: Duration, budget: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_budget = budget;
        self
    }

    pub fn configured(&self) -> bool {
        self.api_url.is_some()
    }

    /// Submit a listings job and wait for its records.
    pub async fn fetch_listings(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Listing>, JobsError> {
        let job_id = self.submit(query, limit).await?;
        info!("listings: job '{}' submitted, polling for results", job_id);

        let start = tokio::time::Instant::now();
        loop {
            if start.elapsed() >= self.poll_budget {
                return Err(JobsError::PollBudgetExhausted {
                    job_id,
                    budget_secs: self.poll_budget.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            match self.poll(&job_id).await? {
                JobProgress::Done(listings) => {
                    info!("listings: job '{}' finished with {} record(s)", job_id, listings.len());
                    return Ok(listings);
                }
                JobProgress::Failed(reason) => return Err(JobsError::JobFailed(reason)),
                JobProgress::Pending => {
                    debug!("listings: job '{}' still running", job_id);
                }
            }
        }
    }

    /// Kick off a job. Transient transport failures are retried with a
    /// short exponential backoff before giving up.
    async fn submit(&self, query: &str, limit: Option<usize>) -> Result<String, JobsError> {
        let api_url = self.api_url.as_deref().ok_or(JobsError::NotConfigured)?;
        let jobs_url = format!("{}/jobs", api_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "query": query,
            "limit": limit,
        });

        let submitted: SubmitResponse = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(250))
                .with_max_interval(Duration::from_secs(2))
                .with_max_elapsed_time(Some(Duration::from_secs(8)))
                .build(),
            || async {
                let mut request = self.client.post(&jobs_url).json(&body);
                if let Some(key) = &self.api_key {
                    request = request.header(API_KEY_HEADER, key);
                }
                let response = request
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| backoff::Error::transient(JobsError::Transport(e)))?;
                response
                    .json::<SubmitResponse>()
                    .await
                    .map_err(|e| backoff::Error::transient(JobsError::Transport(e)))
            },
        )
        .await?;

        Ok(submitted.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobProgress, JobsError> {
        let api_url = self.api_url.as_deref().ok_or(JobsError::NotConfigured)?;
        let url = format!("{}/jobs/{}", api_url.trim_end_matches('/'), job_id);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?.error_for_status()?;
        let status: JobStatusResponse = response.json().await?;
        Ok(interpret(status))
    }
}

enum JobProgress {
    Pending,
    Done(Vec<Listing>),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "jobId", alias = "id")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default, alias = "results")]
    listings: Option<Vec<Listing>>,
    #[serde(default)]
    error: Option<String>,
}

fn interpret(status: JobStatusResponse) -> JobProgress {
    match status.status.as_str() {
        "completed" | "done" | "ready" => JobProgress::Done(status.listings.unwrap_or_default()),
        "failed" | "error" | "cancelled" => JobProgress::Failed(
            status
                .error
                .unwrap_or_else(|| format!("job reported status '{}'", status.status)),
        ),
        _ => JobProgress::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: &str, listings: Option<Vec<Listing>>, error: Option<&str>) -> JobStatusResponse {
        JobStatusResponse {
            status: status.to_string(),
            listings,
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn completed_jobs_yield_their_records() {
        let rows = vec![Listing {
            title: "Backend Intern".to_string(),
            company: "Acme".to_string(),
            location: Some("Remote".to_string()),
            stipend: None,
            duration: Some("3 months".to_string()),
            url: None,
        }];
        match interpret(status("completed", Some(rows), None)) {
            JobProgress::Done(got) => {
                assert_eq!(got.len(), 1);
                assert_eq!(got[0].title, "Backend Intern");
            }
            _ => panic!("expected done"),
        }
    }

    #[test]
    fn completed_without_records_is_an_empty_result_not_an_error() {
        assert!(matches!(
            interpret(status("done", None, None)),
            JobProgress::Done(rows) if rows.is_empty()
        ));
    }

    #[test]
    fn failed_jobs_surface_the_service_error() {
        match interpret(status("failed", None, Some("quota exceeded"))) {
            JobProgress::Failed(reason) => assert_eq!(reason, "quota exceeded"),
            _ => panic!("expected failed"),
        }
        assert!(matches!(
            interpret(status("error", None, None)),
            JobProgress::Failed(_)
        ));
    }

    #[test]
    fn unknown_statuses_keep_polling() {
        assert!(matches!(interpret(status("queued", None, None)), JobProgress::Pending));
        assert!(matches!(interpret(status("running", None, None)), JobProgress::Pending));
    }
}
