//! Job, stage, and outcome types for the review pipeline.
//!
//! The pipeline is an explicit state machine: a job moves forward through
//! [`JobStage`]s and ends in exactly one terminal [`ReviewOutcome`]. Keeping
//! the vocabulary in one place keeps log fields and user-visible messages
//! consistent across the orchestrator and publisher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::event::RepoRef;
use codecritics_core::findings::Severity;

/// Wall-clock budget for one review job.
pub const JOB_DEADLINE: Duration = Duration::from_secs(60);

/// What caused this review to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Auto,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Newtype for generated job identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admitted review in flight. Jobs never survive a restart.
#[derive(Debug, Clone)]
pub struct ReviewJob {
    pub id: JobId,
    pub repo: RepoRef,
    pub pull_number: u64,
    pub trigger: Trigger,
    pub delivery_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: Duration,
}

impl ReviewJob {
    pub fn new(repo: RepoRef, pull_number: u64, trigger: Trigger, delivery_id: String) -> Self {
        Self {
            id: JobId::generate(),
            repo,
            pull_number,
            trigger,
            delivery_id,
            started_at: Utc::now(),
            deadline: JOB_DEADLINE,
        }
    }
}

/// Everything fetched about the PR for one review: metadata, changed files,
/// and the (possibly filtered) unified diff. Owned by the job that built it.
#[derive(Debug, Clone)]
pub struct PrSnapshot {
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub head_sha: String,
    pub base_sha: String,
    pub files: Vec<crate::github::ChangedFile>,
    pub diff: String,
}

/// Pipeline stages, in order. Terminal states are the outcomes, not stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Admitting,
    Fetching,
    Processing,
    Prompting,
    Parsing,
    Publishing,
    Reporting,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admitting => "admitting",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Prompting => "prompting",
            Self::Parsing => "parsing",
            Self::Publishing => "publishing",
            Self::Reporting => "reporting",
        };
        write!(f, "{}", s)
    }
}

/// Why a job was skipped without a model call completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    DiffTooLarge,
    NoSupportedFiles,
    DuplicateRecent,
    RateLimited,
    Disallowed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DiffTooLarge => "diff too large",
            Self::NoSupportedFiles => "no supported files",
            Self::DuplicateRecent => "duplicate of a recent review",
            Self::RateLimited => "rate limited",
            Self::Disallowed => "repository not allowed",
        };
        write!(f, "{}", s)
    }
}

/// Terminal failure categories (spec'd taxonomy; the user-visible phrase is
/// chosen separately from the causing error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Transient,
    Permanent,
    ProviderUnavailable,
    Timeout,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::ProviderUnavailable => "provider unavailable",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Stable user-facing phrases for failure notices.
pub const MSG_AUTH: &str = "Authentication configuration issue detected.";
pub const MSG_NETWORK: &str = "Network connectivity issue encountered.";
pub const MSG_TIMEOUT: &str = "Request timeout — the review took too long to complete.";
pub const MSG_RATE_LIMIT: &str = "Rate limit exceeded — please try again later.";
pub const MSG_UNEXPECTED: &str = "An unexpected error occurred during the review process.";

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    NoIssues,
    Findings {
        count: usize,
        max_severity: Severity,
    },
    Skipped(SkipReason),
    Failed(FailureKind),
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoIssues => write!(f, "no issues"),
            Self::Findings { count, max_severity } => {
                write!(f, "{} finding(s), max severity {}", count, max_severity)
            }
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}
