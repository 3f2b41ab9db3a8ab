//! GitHub REST client covering exactly the capabilities the pipeline needs.
//!
//! Every call surfaces errors through [`GithubError`] so callers can tell
//! retriable failures (network, 5xx, secondary rate limits) from permanent
//! ones. Response bodies that reach error messages are redacted first.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use codecritics_core::sanitize::redact_secrets;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

const API_BASE: &str = "https://api.github.com";
const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_DIFF: &str = "application/vnd.github.v3.diff";
const USER_AGENT: &str = concat!("code-critics/", env!("CARGO_PKG_VERSION"));

/// Timeout for diff downloads, which can be large.
pub const DIFF_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for comment/review/status writes.
pub const POST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for everything else.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub API error: {status} - {message}")]
    Status { status: StatusCode, message: String },

    #[error("network error talking to GitHub: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid GitHub response: {0}")]
    InvalidResponse(String),
}

impl GithubError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network(e) => !e.is_builder() && !e.is_redirect(),
            Self::InvalidResponse(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

pub type GithubResult<T> = Result<T, GithubError>;

/// Authenticated identity on the host.
#[derive(Debug, Deserialize)]
pub struct Identity {
    pub login: String,
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestDetails {
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub head: PrRefDetails,
    pub base: PrRefDetails,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrRefDetails {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    pub patch: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub user: CommentUser,
    pub created_at: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommentUser {
    pub login: String,
}

/// One inline comment in a review, anchored to the right side of the diff.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: u64,
    pub side: &'static str,
    pub body: String,
}

impl ReviewComment {
    pub fn new(path: String, line: u64, body: String) -> Self {
        Self {
            path,
            line,
            side: "RIGHT",
            body,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateReviewRequest<'a> {
    body: &'a str,
    event: &'a str,
    comments: &'a [ReviewComment],
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateStatusRequest<'a> {
    state: &'a str,
    description: &'a str,
    context: &'a str,
}

/// Commit status states GitHub accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimitInfo,
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    token: String,
    base_url: String,
}

impl GithubClient {
    pub fn new(token: String) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            token,
            base_url: API_BASE.to_string(),
        }
    }

    /// Point the client at a different API root (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authed(&self, builder: RequestBuilder, correlation_id: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT_JSON);
        match correlation_id {
            Some(cid) => builder.header(CORRELATION_ID_HEADER, cid),
            None => builder,
        }
    }

    /// Read the response body as an error message, redacted and bounded.
    async fn error_from(response: reqwest::Response) -> GithubError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let redacted = redact_secrets(&body);
        let message: String = redacted.chars().take(500).collect();
        GithubError::Status { status, message }
    }

    /// Capability 1: confirm the token authenticates and learn who we are.
    pub async fn validate_identity(&self) -> GithubResult<Identity> {
        let url = format!("{}/user", self.base_url);
        let response = self.authed(self.client.get(&url), None).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let identity: Identity = response
            .json()
            .await
            .map_err(|e| GithubError::InvalidResponse(e.to_string()))?;
        Ok(identity)
    }

    /// Capability 2.
    pub async fn get_pull_request(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<PullRequestDetails> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.base_url, owner, repo, number);
        info!("Fetching PR #{} from {}/{}", number, owner, repo);

        let response = self
            .authed(self.client.get(&url), correlation_id)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| GithubError::InvalidResponse(e.to_string()))
    }

    /// Capability 3: changed files, paginated.
    pub async fn list_files(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<Vec<ChangedFile>> {
        let per_page = 100;
        let mut page = 1;
        let mut all_files = Vec::new();

        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/files?page={}&per_page={}",
                self.base_url, owner, repo, number, page, per_page
            );
            let response = self
                .authed(self.client.get(&url), correlation_id)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let files: Vec<ChangedFile> = response
                .json()
                .await
                .map_err(|e| GithubError::InvalidResponse(e.to_string()))?;
            let count = files.len();
            all_files.extend(files);
            if count < per_page {
                break;
            }
            page += 1;
        }

        info!("Found {} changed files in PR #{}", all_files.len(), number);
        Ok(all_files)
    }

    /// Capability 4: unified diff between two commits.
    pub async fn compare_commits_diff(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        base_sha: &str,
        head_sha: &str,
    ) -> GithubResult<String> {
        let url = format!(
            "{}/repos/{}/{}/compare/{}...{}",
            self.base_url, owner, repo, base_sha, head_sha
        );
        info!("Fetching diff from {}...{}", base_sha, head_sha);

        let response = self
            .authed(self.client.get(&url), correlation_id)
            .header("Accept", ACCEPT_DIFF)
            .timeout(DIFF_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let diff = response.text().await?;
        info!("Successfully fetched diff ({} bytes)", diff.len());
        Ok(diff)
    }

    /// Download a pre-validated diff URL. The caller is responsible for the
    /// SSRF check; this just performs the GET with the diff media type.
    pub async fn fetch_diff_url(
        &self,
        correlation_id: Option<&str>,
        diff_url: &str,
    ) -> GithubResult<String> {
        let response = self
            .authed(self.client.get(diff_url), correlation_id)
            .header("Accept", ACCEPT_DIFF)
            .timeout(DIFF_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.text().await?)
    }

    /// Capability 5: all issue comments on a PR, paginated.
    pub async fn list_pr_comments(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<Vec<IssueComment>> {
        let per_page = 100;
        let mut page = 1;
        let mut all_comments = Vec::new();

        loop {
            let url = format!(
                "{}/repos/{}/{}/issues/{}/comments?page={}&per_page={}",
                self.base_url, owner, repo, number, page, per_page
            );
            let response = self
                .authed(self.client.get(&url), correlation_id)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let comments: Vec<IssueComment> = response
                .json()
                .await
                .map_err(|e| GithubError::InvalidResponse(e.to_string()))?;
            let count = comments.len();
            all_comments.extend(comments);
            if count < per_page {
                break;
            }
            page += 1;
        }

        Ok(all_comments)
    }

    /// Capability 6.
    pub async fn create_issue_comment(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> GithubResult<IssueComment> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, owner, repo, number
        );
        info!("Posting comment to PR #{} in {}/{}", number, owner, repo);

        let response = self
            .authed(self.client.post(&url), correlation_id)
            .timeout(POST_TIMEOUT)
            .json(&CreateCommentRequest { body })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let comment: IssueComment = response
            .json()
            .await
            .map_err(|e| GithubError::InvalidResponse(e.to_string()))?;
        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment)
    }

    /// Capability 7: a review with inline comments, created in one call.
    pub async fn create_review(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
        event: &str,
        comments: &[ReviewComment],
    ) -> GithubResult<()> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            self.base_url, owner, repo, number
        );
        info!(
            "Creating review with {} inline comments on PR #{}",
            comments.len(),
            number
        );

        let response = self
            .authed(self.client.post(&url), correlation_id)
            .timeout(POST_TIMEOUT)
            .json(&CreateReviewRequest {
                body,
                event,
                comments,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    /// Capability 8.
    pub async fn create_commit_status(
        &self,
        correlation_id: Option<&str>,
        owner: &str,
        repo: &str,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
    ) -> GithubResult<()> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.base_url, owner, repo, sha
        );

        let response = self
            .authed(self.client.post(&url), correlation_id)
            .timeout(POST_TIMEOUT)
            .json(&CreateStatusRequest {
                state: state.as_str(),
                description,
                context,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            // A failed status write is worth a warning even when the caller
            // goes on to ignore it.
            let err = Self::error_from(response).await;
            warn!("Failed to set commit status on {}: {}", sha, err);
            return Err(err);
        }
        Ok(())
    }

    /// Capability 9.
    pub async fn rate_limit(&self) -> GithubResult<RateLimitInfo> {
        let url = format!("{}/rate_limit", self.base_url);
        let response = self.authed(self.client.get(&url), None).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let parsed: RateLimitResponse = response
            .json()
            .await
            .map_err(|e| GithubError::InvalidResponse(e.to_string()))?;
        Ok(parsed.rate)
    }
}
