//! The captcha solver client against a mocked solving service: submit,
//! poll-until-solved, poll budget, and terminal failure statuses.

use std::time::Duration;

use inbox_scout::auth::captcha::SolverClient;
use inbox_scout::core::config::SolverConfig;
use inbox_scout::core::error::CaptchaError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SolverClient {
    let config = SolverConfig {
        api_url: Some(server.uri()),
        api_key: Some("secret".to_string()),
    };
    // Millisecond cadence so the full loop runs without real waits.
    SolverClient::new(&config).with_poll_timing(Duration::from_millis(5), Duration::from_secs(2))
}

#[tokio::test]
async fn solve_polls_until_the_service_reports_a_solution() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("X-Api-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "taskId": "t-1"
        })))
        .mount(&server)
        .await;

    // Two pending polls, then the solution.
    Mock::given(method("GET"))
        .and(path("/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "pending"
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t-1"))
        .and(header("X-Api-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "solved",
            "solution": "XK4F9"
        })))
        .mount(&server)
        .await;

    let solution = client_for(&server).solve(b"fake-png-bytes").await.unwrap();
    assert_eq!(solution, "XK4F9");
}

#[tokio::test]
async fn solve_gives_up_when_the_poll_budget_runs_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "t-2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "processing"
        })))
        .mount(&server)
        .await;

    let client = SolverClient::new(&SolverConfig {
        api_url: Some(server.uri()),
        api_key: None,
    })
    .with_poll_timing(Duration::from_millis(5), Duration::from_millis(40));

    let err = client.solve(b"fake-png-bytes").await.unwrap_err();
    assert!(matches!(err, CaptchaError::PollBudgetExhausted { .. }));
}

#[tokio::test]
async fn terminal_solver_statuses_stop_the_loop() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "taskId": "t-3"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "unsolvable"
        })))
        .mount(&server)
        .await;

    let client = SolverClient::new(&SolverConfig {
        api_url: Some(server.uri()),
        api_key: None,
    })
    .with_poll_timing(Duration::from_millis(5), Duration::from_secs(2));

    let err = client.solve(b"fake-png-bytes").await.unwrap_err();
    assert!(matches!(err, CaptchaError::Unsolved(_)));
}

#[tokio::test]
async fn an_unconfigured_solver_reports_itself() {
    let client = SolverClient::new(&SolverConfig {
        api_url: None,
        api_key: None,
    });
    // Env fallback may be set on a developer machine; only assert when the
    // environment is clean.
    if std::env::var("CAPTCHA_API_URL").is_err() {
        assert!(!client.configured());
    }
}
