//! Service self-test for `GET /health`.
//!
//! Health is judged by whether the service could actually run a review
//! right now: secrets present, GitHub identity valid, a provider selected.
//! GitHub reachability drives the ok/degraded split; a missing provider is
//! a misconfiguration.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let config = &state.config;

    let secrets = json!({
        "github_token": true,
        "webhook_secret": true,
        "gemini_api_key": config.gemini_api_key.is_some(),
        "deepseek_api_key": config.deepseek_api_key.is_some(),
    });

    let configuration = json!({
        "provider": config.provider.name(),
        "max_diff_size": config.max_diff_size,
        "allow_list_enabled": !config.allowed_repositories.is_empty(),
        "allowed_extensions": config.allowed_file_extensions.len(),
    });

    let provider = match &state.gateway {
        Some(gateway) => json!({
            "name": gateway.provider_name(),
            "fallback_engaged": gateway.fallback_engaged(),
        }),
        None => json!({ "name": null, "available": false }),
    };

    let identity = state.github.validate_identity().await;
    let rate_limit = match state.github.rate_limit().await {
        Ok(info) => json!({
            "limit": info.limit,
            "remaining": info.remaining,
            "reset": info.reset,
        }),
        Err(e) => {
            warn!("health: rate limit query failed: {}", e);
            json!(null)
        }
    };

    let github = match &identity {
        Ok(id) => json!({
            "authenticated": true,
            "login": id.login,
            "rate_limit": rate_limit,
        }),
        Err(e) => json!({
            "authenticated": false,
            "error": e.to_string(),
            "rate_limit": rate_limit,
        }),
    };

    let (status_code, status) = if state.gateway.is_none() {
        (StatusCode::INTERNAL_SERVER_ERROR, "misconfigured")
    } else if identity.is_ok() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = json!({
        "status": status,
        "service": crate::SERVICE_NAME,
        "version": crate::service_version(),
        "secrets": secrets,
        "configuration": configuration,
        "provider": provider,
        "github": github,
    });

    (status_code, Json(body)).into_response()
}
