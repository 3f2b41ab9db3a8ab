//! Front door: signature verification and webhook dispatch.
//!
//! The dispatcher's contract is a fast ACK: signature and shape checks run
//! inline, the review itself runs on a detached task. Nothing downstream of
//! the signature check ever sees an unauthenticated byte.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::{parse_comment, MentionCommand, ParseResult};
use crate::event::{classify_payload, Classification, EventEnvelope, WebhookPayload};
use crate::outcome::Trigger;
use crate::AppState;
use codecritics_core::sanitize::Sanitizer;

/// Maximum accepted webhook body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct WebhookErrorResponse {
    pub error: String,
    pub details: Vec<String>,
}

/// Constant-time verification of `sha256=<hex>` over the raw body.
///
/// Everything about the header is checked before the MAC comparison: the
/// prefix, the hex decode, and the digest length. The comparison itself is
/// `Mac::verify_slice`, which is constant-time by contract.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if signature_bytes.len() != 32 {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Produce the `sha256=<hex>` header value for a body. Used by tests and
/// local tooling to build valid deliveries.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Middleware: reject any request whose signature does not match before the
/// handler touches the payload.
async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_signature(&state.config.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, StatusCode> {
    let event = header_string(request.headers(), "x-github-event").unwrap_or_default();
    let delivery_id = header_string(request.headers(), "x-github-delivery")
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let raw_value: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            return Ok(bad_request(vec![format!("body: invalid JSON ({})", e)]));
        }
    };
    let payload: WebhookPayload = match serde_json::from_value(raw_value.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Ok(bad_request(vec![format!("body: unexpected shape ({})", e)]));
        }
    };

    info!(event = %event, delivery = %delivery_id, "received webhook delivery");

    let classification = match classify_payload(&event, &delivery_id, &payload) {
        Ok(c) => c,
        Err(details) => return Ok(bad_request(details)),
    };

    // The payload is logged only after the ACK decision, and only sanitized.
    log_payload_after_ack(&event, &delivery_id, raw_value);

    match classification {
        Classification::Ping => Ok(ack(StatusCode::OK, "pong")),
        Classification::PrChanged(envelope) => {
            Ok(launch_review(state, envelope, Trigger::Auto))
        }
        Classification::MentionComment(envelope) => {
            let body = envelope.comment_body.as_deref().unwrap_or_default();
            match parse_comment(body) {
                ParseResult::Command(MentionCommand::Review) => {
                    Ok(launch_review(state, envelope, Trigger::Manual))
                }
                ParseResult::Command(MentionCommand::Help) => {
                    let orchestrator = state.orchestrator.clone();
                    tokio::spawn(async move {
                        orchestrator.post_help(&envelope).await;
                    });
                    Ok(ack(StatusCode::ACCEPTED, "help requested"))
                }
                ParseResult::NoMention => {
                    // The mention token appeared inside a longer handle.
                    Ok(ack(StatusCode::ACCEPTED, "not handled: no direct mention"))
                }
            }
        }
        Classification::Ignored { reason } => {
            info!(delivery = %delivery_id, "not handled: {}", reason);
            Ok(ack(StatusCode::ACCEPTED, &format!("not handled: {}", reason)))
        }
    }
}

/// ACK fast and run the review on a detached task. A saturated job table
/// refuses the event instead of queueing unboundedly.
fn launch_review(state: Arc<AppState>, envelope: EventEnvelope, trigger: Trigger) -> Response {
    let orchestrator = state.orchestrator.clone();

    let Some(permit) = orchestrator.try_begin() else {
        warn!(
            repo = %envelope.repo.full_name,
            "job table saturated, refusing delivery"
        );
        let notice_orchestrator = orchestrator.clone();
        let notice_envelope = envelope.clone();
        tokio::spawn(async move {
            notice_orchestrator
                .refuse_saturated(&notice_envelope, trigger)
                .await;
        });
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(WebhookResponse {
                message: "review capacity exhausted, try again later".to_string(),
            }),
        )
            .into_response();
    };

    let job = tokio::spawn(async move {
        orchestrator.run(envelope, trigger, permit).await;
    });
    // A panic in the job must surface in the logs as an internal bug, not
    // disappear with the detached task.
    tokio::spawn(async move {
        if let Err(e) = job.await {
            if e.is_panic() {
                error!("review job panicked: {}", e);
            }
        }
    });

    ack(StatusCode::ACCEPTED, "review accepted")
}

fn log_payload_after_ack(event: &str, delivery_id: &str, raw: Value) {
    let event = event.to_string();
    let delivery_id = delivery_id.to_string();
    tokio::spawn(async move {
        let sanitized = Sanitizer::sanitize_json(&raw);
        info!(
            event = %event,
            delivery = %delivery_id,
            payload = %sanitized,
            "webhook payload"
        );
    });
}

fn ack(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(WebhookResponse {
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(details: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(WebhookErrorResponse {
            error: "invalid webhook payload".to_string(),
            details,
        }),
    )
        .into_response()
}

/// The webhook route with the signature middleware in front. Non-POST
/// methods get 405 from the router itself.
pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/webhooks",
        post(webhook_handler).route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        )),
    )
}
