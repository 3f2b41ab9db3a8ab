//! Dispatcher-level tests: signature enforcement, payload validation, and
//! the ACK contract, exercised through the real router without any network.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use codecritics_core::diff::{SizePolicy, DEFAULT_EXTENSIONS};
use codecritics_server::admission::AdmissionController;
use codecritics_server::config::{Config, ProviderKind, StatusOnFindings};
use codecritics_server::github::GithubClient;
use codecritics_server::llm::LlmGateway;
use codecritics_server::orchestrator::Orchestrator;
use codecritics_server::publisher::Publisher;
use codecritics_server::webhook::{sign_payload, webhook_router};
use codecritics_server::AppState;

const SECRET: &str = "integration-test-secret";

fn test_config() -> Config {
    Config {
        github_token: "test-token".to_string(),
        webhook_secret: SECRET.to_string(),
        provider: ProviderKind::Gemini,
        gemini_api_key: Some("test-key".to_string()),
        deepseek_api_key: None,
        max_diff_size: 100_000,
        log_level: tracing::Level::INFO,
        allowed_repositories: Vec::new(),
        allowed_file_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        status_on_findings: StatusOnFindings::Failure,
        port: 0,
        production: false,
    }
}

fn test_app() -> Router {
    let config = Arc::new(test_config());
    let github = Arc::new(GithubClient::new(config.github_token.clone()));
    let gateway = LlmGateway::from_config(&config).ok().map(Arc::new);
    let publisher = Publisher::new(github.clone(), config.status_on_findings);
    let orchestrator = Arc::new(Orchestrator::new(
        github.clone(),
        gateway.clone(),
        AdmissionController::new(config.allowed_repositories.clone()),
        publisher,
        SizePolicy::new(
            config.max_diff_size,
            config.allowed_file_extensions.clone(),
        ),
    ));
    let state = Arc::new(AppState {
        config,
        github,
        gateway,
        orchestrator,
    });

    Router::new()
        .merge(webhook_router(state.clone()))
        .with_state(state)
}

fn signed_request(event: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = sign_payload(SECRET, &bytes);
    Request::builder()
        .method("POST")
        .uri("/api/webhooks")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "11111111-2222-3333-4444-555555555555")
        .header("x-hub-signature-256", signature)
        .body(Body::from(bytes))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_ping_returns_pong() {
    let app = test_app();
    let response = app
        .oneshot(signed_request("ping", &json!({"zen": "Keep it simple."})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn test_non_post_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/webhooks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks")
                .header("x-github-event", "ping")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_signature_is_unauthorized() {
    let app = test_app();
    let bytes = serde_json::to_vec(&json!({"zen": "x"})).unwrap();
    let mut signature = sign_payload(SECRET, &bytes);
    // Mutate one hex character of the signature.
    let last = signature.pop().unwrap();
    signature.push(if last == '0' { '1' } else { '0' });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks")
                .header("x-github-event", "ping")
                .header("x-hub-signature-256", signature)
                .body(Body::from(bytes))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_body_is_unauthorized() {
    let app = test_app();
    let bytes = serde_json::to_vec(&json!({"zen": "x"})).unwrap();
    let signature = sign_payload(SECRET, &bytes);
    let mut tampered = bytes.clone();
    tampered[0] ^= 0x01;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks")
                .header("x-github-event", "ping")
                .header("x-hub-signature-256", signature)
                .body(Body::from(tampered))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = test_app();
    let bytes = b"not json at all".to_vec();
    let signature = sign_payload(SECRET, &bytes);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks")
                .header("x-github-event", "pull_request")
                .header("x-hub-signature-256", signature)
                .body(Body::from(bytes))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid webhook payload");
    assert!(body["details"].as_array().is_some());
}

#[tokio::test]
async fn test_structurally_invalid_pr_event_lists_field_errors() {
    let app = test_app();
    let payload = json!({
        "action": "opened",
        "repository": { "full_name": "alice/repo" },
        "pull_request": {}
    });
    let response = app
        .oneshot(signed_request("pull_request", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let details: Vec<String> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_str().unwrap().to_string())
        .collect();
    assert!(details.iter().any(|d| d.contains("pull_request.number")));
    assert!(details.iter().any(|d| d.contains("pull_request.diff_url")));
}

#[tokio::test]
async fn test_unhandled_event_is_acknowledged() {
    let app = test_app();
    let payload = json!({
        "action": "published",
        "repository": { "full_name": "alice/repo" }
    });
    let response = app.oneshot(signed_request("release", &payload)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("not handled"));
}

#[tokio::test]
async fn test_unhandled_pr_action_is_acknowledged() {
    let app = test_app();
    let payload = json!({
        "action": "labeled",
        "repository": { "full_name": "alice/repo" },
        "pull_request": { "number": 7 }
    });
    let response = app
        .oneshot(signed_request("pull_request", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_comment_without_mention_is_acknowledged_not_run() {
    let app = test_app();
    let payload = json!({
        "action": "created",
        "repository": { "full_name": "alice/repo" },
        "issue": {
            "number": 7,
            "pull_request": { "url": "https://api.github.com/repos/alice/repo/pulls/7" }
        },
        "comment": { "body": "looks good to me", "user": { "login": "bob" } }
    });
    let response = app
        .oneshot(signed_request("issue_comment", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("not handled"));
}
