//! Reflects review outcomes back onto the pull request.
//!
//! Three surfaces: a PR-level summary comment (carries the summary and
//! timestamp markers), a review with inline comments, and the commit status.
//! Each can fail independently; callers log and continue rather than letting
//! a failed comment take down a finished review.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StatusOnFindings;
use crate::github::{CommitState, GithubClient, GithubResult, ReviewComment};
use crate::outcome::{ReviewJob, SkipReason, MSG_RATE_LIMIT};
use codecritics_core::findings::Finding;
use codecritics_core::markers::{timestamp_marker, INLINE_MARKER, SUMMARY_MARKER};

/// Context string for all commit statuses this service writes.
pub const STATUS_CONTEXT: &str = "CodeCritic AI Review";

pub struct Publisher {
    github: Arc<GithubClient>,
    status_on_findings: StatusOnFindings,
}

impl Publisher {
    pub fn new(github: Arc<GithubClient>, status_on_findings: StatusOnFindings) -> Self {
        Self {
            github,
            status_on_findings,
        }
    }

    /// Commit status state used when a completed review has findings.
    /// `failure` by default so the PR UI surfaces the review as blocking.
    pub fn findings_state(&self) -> CommitState {
        match self.status_on_findings {
            StatusOnFindings::Failure => CommitState::Failure,
            StatusOnFindings::Success => CommitState::Success,
        }
    }

    /// Create the review: one API call with the inline comments attached.
    pub async fn publish_review(
        &self,
        job: &ReviewJob,
        findings: &[Finding],
    ) -> GithubResult<()> {
        let comments: Vec<ReviewComment> = findings
            .iter()
            .map(|f| ReviewComment::new(f.path.clone(), f.line, f.render_comment_body()))
            .collect();

        let review_body = format!(
            "Automated review flagged {} potential issue(s). See the inline comments.\n\n{}\n",
            findings.len(),
            INLINE_MARKER
        );

        self.github
            .create_review(
                Some(&job.delivery_id),
                &job.repo.owner,
                &job.repo.name,
                job.pull_number,
                &review_body,
                "COMMENT",
                &comments,
            )
            .await
    }

    /// Post the PR-level summary comment for a findings-bearing review.
    pub async fn post_findings_summary(
        &self,
        job: &ReviewJob,
        findings: &[Finding],
    ) -> GithubResult<()> {
        let mut body = format!(
            "## 🤖 CodeCritic AI Review\n\nFound **{}** potential issue(s) in this pull request.\n\n",
            findings.len()
        );
        for severity in [
            codecritics_core::findings::Severity::Critical,
            codecritics_core::findings::Severity::High,
            codecritics_core::findings::Severity::Medium,
            codecritics_core::findings::Severity::Low,
        ] {
            let count = findings.iter().filter(|f| f.severity == severity).count();
            if count > 0 {
                body.push_str(&format!("- **{}**: {}\n", severity, count));
            }
        }
        body.push_str("\nSee the inline review comments for details and suggested changes.\n");
        self.post_summary_comment(job, body).await
    }

    /// Post the "no issues" summary.
    pub async fn post_no_issues_summary(&self, job: &ReviewJob) -> GithubResult<()> {
        let body =
            "## 🤖 CodeCritic AI Review\n\n✅ No significant issues found. Good job!\n".to_string();
        self.post_summary_comment(job, body).await
    }

    async fn post_summary_comment(&self, job: &ReviewJob, mut body: String) -> GithubResult<()> {
        body.push_str(&format!(
            "\n{}\n{}\n",
            SUMMARY_MARKER,
            timestamp_marker(Utc::now())
        ));
        self.github
            .create_issue_comment(
                Some(&job.delivery_id),
                &job.repo.owner,
                &job.repo.name,
                job.pull_number,
                &body,
            )
            .await?;
        info!(
            repo = %job.repo.full_name,
            pr = job.pull_number,
            "posted review summary comment"
        );
        Ok(())
    }

    /// Human-readable notice for a skipped review. Notices carry the inline
    /// marker (not the summary marker) so they never trip the dedup oracle.
    pub async fn post_skip_notice(&self, job: &ReviewJob, reason: SkipReason) -> GithubResult<()> {
        let explanation = match reason {
            SkipReason::DiffTooLarge => {
                "the diff is too large to review, even after filtering to supported file types"
            }
            SkipReason::NoSupportedFiles => "none of the changed files have a supported extension",
            SkipReason::DuplicateRecent => "a review was completed for this pull request recently",
            SkipReason::RateLimited => "the review budget for this repository is exhausted",
            SkipReason::Disallowed => "this repository is not enabled for reviews",
        };
        let body = format!(
            "⚠️ **Review skipped**: {}.\n\n{}\n",
            explanation, INLINE_MARKER
        );
        self.post_notice(job, &body).await
    }

    /// Notice posted when the admission controller refuses a job.
    pub async fn post_rate_limit_notice(&self, job: &ReviewJob) -> GithubResult<()> {
        let body = format!("⚠️ {}\n\n{}\n", MSG_RATE_LIMIT, INLINE_MARKER);
        self.post_notice(job, &body).await
    }

    /// Reply to `@codecritics help` with the command list.
    pub async fn post_help_comment(&self, job: &ReviewJob) -> GithubResult<()> {
        let body = format!(
            "❓ **CodeCritic commands**\n\n\
             - `@codecritics` or `@codecritics review` — request a manual review\n\
             - `@codecritics help` — show this message\n\n\
             {}\n",
            INLINE_MARKER
        );
        self.post_notice(job, &body).await
    }

    /// Sanitized failure notice with one of the stable phrases.
    pub async fn post_failure_notice(&self, job: &ReviewJob, message: &str) -> GithubResult<()> {
        let body = format!("❌ **Review failed**: {}\n\n{}\n", message, INLINE_MARKER);
        self.post_notice(job, &body).await
    }

    async fn post_notice(&self, job: &ReviewJob, body: &str) -> GithubResult<()> {
        self.github
            .create_issue_comment(
                Some(&job.delivery_id),
                &job.repo.owner,
                &job.repo.name,
                job.pull_number,
                body,
            )
            .await
            .map(|_| ())
    }

    /// Write a commit status. Best effort: callers decide whether a failed
    /// write matters, so the error is logged here and returned.
    pub async fn set_status(
        &self,
        job: &ReviewJob,
        head_sha: &str,
        state: CommitState,
        description: &str,
    ) -> GithubResult<()> {
        let result = self
            .github
            .create_commit_status(
                Some(&job.delivery_id),
                &job.repo.owner,
                &job.repo.name,
                head_sha,
                state,
                description,
                STATUS_CONTEXT,
            )
            .await;
        if let Err(e) = &result {
            warn!(
                repo = %job.repo.full_name,
                sha = head_sha,
                "failed to set commit status: {}",
                e
            );
        }
        result
    }
}
