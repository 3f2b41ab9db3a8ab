use anyhow::Result;
use axum::{response::Json, routing::get};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use codecritics_server::admission::AdmissionController;
use codecritics_server::config::Config;
use codecritics_server::github::GithubClient;
use codecritics_server::health::health_handler;
use codecritics_server::llm::LlmGateway;
use codecritics_server::orchestrator::Orchestrator;
use codecritics_server::publisher::Publisher;
use codecritics_server::webhook::webhook_router;
use codecritics_server::{AppState, SERVICE_NAME};
use codecritics_core::diff::SizePolicy;

async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": codecritics_server::service_version(),
        "description": "Automated AI code reviews for pull requests",
        "endpoints": [
            {
                "path": "/api/webhooks",
                "method": "POST",
                "description": "GitHub webhook receiver for PR and comment events",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)"
            },
            {
                "path": "/health",
                "method": "GET",
                "description": "Service health and dependency self-test",
                "authentication": "None"
            },
            {
                "path": "/api/info",
                "method": "GET",
                "description": "Service metadata",
                "authentication": "None"
            }
        ],
        "features": [
            "Automated reviews on PR open/synchronize/reopen events",
            "Manual re-review via @codecritics mention in a PR comment",
            "Inline review comments with severity and suggested changes",
            "Commit status reporting per review outcome",
            "Per-repository rate limiting and optional allow-list"
        ],
        "configuration": {
            "required_env_vars": [
                "GITHUB_TOKEN",
                "WEBHOOK_SECRET",
                "GEMINI_API_KEY or DEEPSEEK_API_KEY"
            ],
            "optional_env_vars": [
                "AI_PROVIDER (default: gemini)",
                "MAX_DIFF_SIZE (default: 100000)",
                "LOG_LEVEL (default: info)",
                "ALLOWED_REPOSITORIES",
                "ALLOWED_FILE_EXTENSIONS",
                "REVIEW_STATUS_ON_FINDINGS (default: failure)",
                "PORT (default: 3000)"
            ]
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    info!("Starting {} webhook service", SERVICE_NAME);

    let config = Arc::new(config);
    let github = Arc::new(GithubClient::new(config.github_token.clone()));

    let gateway = match LlmGateway::from_config(&config) {
        Ok(g) => Some(Arc::new(g)),
        Err(e) => {
            warn!(
                "No LLM provider available ({}); reviews will fail until configuration is fixed",
                e
            );
            None
        }
    };

    let admission = AdmissionController::new(config.allowed_repositories.clone());
    let publisher = Publisher::new(github.clone(), config.status_on_findings);
    let policy = SizePolicy::new(
        config.max_diff_size,
        config.allowed_file_extensions.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        github.clone(),
        gateway.clone(),
        admission,
        publisher,
        policy,
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        github,
        gateway,
        orchestrator,
    });

    let app = axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
