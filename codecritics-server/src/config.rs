use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::str::FromStr;

use codecritics_core::diff::{DEFAULT_EXTENSIONS, DEFAULT_MAX_DIFF_BYTES};

/// Which LLM provider to prefer. The other one acts as the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Deepseek,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Deepseek => "deepseek",
        }
    }

    /// The provider tried when this one cannot be constructed.
    pub fn fallback(&self) -> Self {
        match self {
            Self::Gemini => Self::Deepseek,
            Self::Deepseek => Self::Gemini,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "deepseek" => Ok(Self::Deepseek),
            other => bail!("AI_PROVIDER must be 'gemini' or 'deepseek', got '{}'", other),
        }
    }
}

/// Commit status posted when a review produced findings. Defaults to
/// `failure` so the PR UI surfaces the findings as a blocking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOnFindings {
    Failure,
    Success,
}

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub webhook_secret: String,
    pub provider: ProviderKind,
    pub gemini_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub max_diff_size: usize,
    pub log_level: tracing::Level,
    /// Empty means every repository is allowed.
    pub allowed_repositories: Vec<String>,
    pub allowed_file_extensions: Vec<String>,
    pub status_on_findings: StatusOnFindings,
    pub port: u16,
    /// Production mode redacts provider error bodies wholesale.
    pub production: bool,
}

/// Read a required config value.
///
/// For a key like "WEBHOOK_SECRET":
/// 1. Check if WEBHOOK_SECRET_FILE is set - if so, read from that file path
/// 2. Otherwise, check WEBHOOK_SECRET env var directly
///
/// When reading from env var, `\n` escape sequences are converted to actual
/// newlines so multi-line secrets survive single-line env storage.
fn read_secret(key: &str) -> Result<String> {
    let file_key = format!("{}_FILE", key);

    if let Ok(path) = env::var(&file_key) {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {} from file: {}", key, path))?;
        Ok(contents.trim_end().to_string())
    } else {
        let value = env::var(key)
            .with_context(|| format!("{} or {} environment variable is required", key, file_key))?;
        Ok(value.replace("\\n", "\n"))
    }
}

/// Read an optional config value with the same `_FILE` indirection as
/// [`read_secret`]. Returns `None` when unset or blank; an unreadable
/// explicitly-set `_FILE` is an error, not a silent `None`.
fn read_secret_optional(key: &str) -> Result<Option<String>> {
    let file_key = format!("{}_FILE", key);

    let value = if let Ok(path) = env::var(&file_key) {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {} from file: {}", key, path))?;
        Some(contents)
    } else {
        env::var(key).ok()
    };

    Ok(value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

/// Normalize an extension list: lowercase, leading dot enforced.
fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e
            } else {
                format!(".{}", e)
            }
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token = read_secret("GITHUB_TOKEN")?;
        let webhook_secret = read_secret("WEBHOOK_SECRET")?;

        let provider = env::var("AI_PROVIDER")
            .unwrap_or_else(|_| "gemini".to_string())
            .parse::<ProviderKind>()?;

        let gemini_api_key = read_secret_optional("GEMINI_API_KEY")?;
        let deepseek_api_key = read_secret_optional("DEEPSEEK_API_KEY")?;
        if gemini_api_key.is_none() && deepseek_api_key.is_none() {
            bail!("At least one of GEMINI_API_KEY or DEEPSEEK_API_KEY is required");
        }

        let max_diff_size = match env::var("MAX_DIFF_SIZE") {
            Ok(v) => v
                .parse::<usize>()
                .context("MAX_DIFF_SIZE must be a valid number of bytes")?,
            Err(_) => DEFAULT_MAX_DIFF_BYTES,
        };

        let log_level = match env::var("LOG_LEVEL") {
            Ok(v) => tracing::Level::from_str(&v)
                .with_context(|| format!("LOG_LEVEL '{}' is not a valid level", v))?,
            Err(_) => tracing::Level::INFO,
        };

        let allowed_repositories = env::var("ALLOWED_REPOSITORIES")
            .map(|v| {
                v.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let allowed_file_extensions = env::var("ALLOWED_FILE_EXTENSIONS")
            .map(|v| parse_extensions(&v))
            .unwrap_or_else(|_| DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect());

        let status_on_findings = match env::var("REVIEW_STATUS_ON_FINDINGS") {
            Ok(v) => match v.trim().to_lowercase().as_str() {
                "success" => StatusOnFindings::Success,
                "failure" => StatusOnFindings::Failure,
                other => bail!(
                    "REVIEW_STATUS_ON_FINDINGS must be 'success' or 'failure', got '{}'",
                    other
                ),
            },
            Err(_) => StatusOnFindings::Failure,
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let production = env::var("ENVIRONMENT")
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Config {
            github_token,
            webhook_secret,
            provider,
            gemini_api_key,
            deepseek_api_key,
            max_diff_size,
            log_level,
            allowed_repositories,
            allowed_file_extensions,
            status_on_findings,
            port,
            production,
        })
    }
}
