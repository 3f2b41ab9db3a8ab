//! Provider-polymorphic LLM gateway.
//!
//! One operation matters: turn a prompt into reply text. Providers differ in
//! wire format and auth; everything above them (timeouts, retries, failover,
//! redaction) lives in [`LlmGateway`] so the orchestrator sees a single
//! uniform surface.

mod retry;

pub mod deepseek;
pub mod gemini;

pub use retry::{with_retry, RetryConfig};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ProviderKind};
use codecritics_core::sanitize::{redact_secrets, PRODUCTION_REDACTED};

/// Hard cap on a single provider call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Output budget requested from providers.
pub const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Near-deterministic sampling for reproducible reviews.
pub const TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single chat-completion request. Provider options are this fixed struct;
/// there is deliberately no open option map.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system: system.into(),
            messages,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The one capability a provider must offer.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat_complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Provider selection plus the per-call protocol: timeout, bounded retries
/// with backoff, and error redaction.
pub struct LlmGateway {
    provider: Arc<dyn ProviderClient>,
    /// True if the configured primary could not be constructed and the
    /// other provider took over.
    fallback_engaged: bool,
    retry: RetryConfig,
    call_timeout: Duration,
    production: bool,
}

impl LlmGateway {
    /// Select the configured provider, falling back to the other one if the
    /// primary cannot be constructed (e.g. its key is absent).
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let primary = config.provider;
        let (provider, fallback_engaged) = match build_provider(primary, config) {
            Ok(p) => (p, false),
            Err(primary_err) => {
                let fallback = primary.fallback();
                warn!(
                    "Primary provider '{}' unavailable ({}), trying '{}'",
                    primary.name(),
                    primary_err,
                    fallback.name()
                );
                (build_provider(fallback, config)?, true)
            }
        };

        info!("LLM gateway using provider '{}'", provider.name());
        Ok(Self {
            provider,
            fallback_engaged,
            retry: RetryConfig::default(),
            call_timeout: CALL_TIMEOUT,
            production: config.production,
        })
    }

    /// Wrap an already-constructed provider. Used by tests and embedders
    /// that manage provider construction themselves.
    pub fn with_provider(provider: Arc<dyn ProviderClient>, production: bool) -> Self {
        Self {
            provider,
            fallback_engaged: false,
            retry: RetryConfig::default(),
            call_timeout: CALL_TIMEOUT,
            production,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn fallback_engaged(&self) -> bool {
        self.fallback_engaged
    }

    /// Run one completion under the retry policy and per-call timeout.
    /// Errors leaving this method are already safe to log and display.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let result = with_retry(&self.retry, || async {
            match tokio::time::timeout(self.call_timeout, self.provider.chat_complete(request))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout(self.call_timeout)),
            }
        })
        .await;

        result.map_err(|e| self.sanitize_error(e))
    }

    /// Scrub provider error surfaces before they escape the gateway.
    fn sanitize_error(&self, err: LlmError) -> LlmError {
        let scrub = |message: String| {
            if self.production {
                PRODUCTION_REDACTED.to_string()
            } else {
                redact_secrets(&message)
            }
        };
        match err {
            LlmError::Api { status, message } => LlmError::Api {
                status,
                message: scrub(message),
            },
            LlmError::InvalidResponse(message) => LlmError::InvalidResponse(scrub(message)),
            LlmError::Authentication(message) => {
                LlmError::Authentication(redact_secrets(&message))
            }
            other => other,
        }
    }
}

fn build_provider(
    kind: ProviderKind,
    config: &Config,
) -> Result<Arc<dyn ProviderClient>, LlmError> {
    match kind {
        ProviderKind::Gemini => {
            let key = config.gemini_api_key.clone().ok_or_else(|| {
                LlmError::Configuration("GEMINI_API_KEY is not configured".to_string())
            })?;
            Ok(Arc::new(gemini::GeminiClient::new(key)))
        }
        ProviderKind::Deepseek => {
            let key = config.deepseek_api_key.clone().ok_or_else(|| {
                LlmError::Configuration("DEEPSEEK_API_KEY is not configured".to_string())
            })?;
            Ok(Arc::new(deepseek::DeepseekClient::new(key)))
        }
    }
}

/// Map an HTTP status + body from a provider into an [`LlmError`].
/// Shared by both provider implementations.
pub(crate) fn error_from_status(
    status: reqwest::StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited { retry_after };
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return LlmError::Authentication(body);
    }
    LlmError::Api {
        status: status.as_u16(),
        message: body,
    }
}

/// Parse a `Retry-After` header value (seconds form only).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
