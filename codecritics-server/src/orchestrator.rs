//! The review pipeline: admission, fetch, size policy, model call, parse,
//! publish, report.
//!
//! One job per admitted event. Stages run in order under a single wall-clock
//! deadline; every exit path lands in exactly one terminal
//! [`ReviewOutcome`]. Jobs for the same `(repo, pull, head_sha)` never
//! interleave: a second event for a key that is already running is coalesced
//! into `Skipped(DuplicateRecent)`.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::dedup::is_duplicate_run;
use crate::event::EventEnvelope;
use crate::fetcher::fetch_diff;
use crate::github::{CommitState, GithubClient, GithubError, PullRequestDetails};
use crate::llm::{ChatMessage, CompletionRequest, LlmError, LlmGateway};
use crate::outcome::{
    FailureKind, JobStage, PrSnapshot, ReviewJob, ReviewOutcome, SkipReason, Trigger, MSG_AUTH,
    MSG_NETWORK, MSG_RATE_LIMIT, MSG_TIMEOUT, MSG_UNEXPECTED,
};
use crate::publisher::Publisher;
use codecritics_core::diff::{
    chunk_diff, clamp_line, right_side_ranges, DiffDecision, SizePolicy, DEFAULT_CHUNK_BYTES,
};
use codecritics_core::findings::Finding;
use codecritics_core::parser::parse_review_reply;
use codecritics_core::prompt::{system_prompt, user_prompt};

/// Upper bound on concurrently running review jobs.
pub const MAX_CONCURRENT_JOBS: usize = 64;

/// Serialization key: one running job per head commit of a PR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    full_name: String,
    pull_number: u64,
    head_sha: String,
}

/// A stage failure carrying everything the terminal handler needs.
#[derive(Debug)]
struct StageFailure {
    stage: JobStage,
    kind: FailureKind,
    /// Already-sanitized, user-visible phrase.
    message: &'static str,
    /// Internal detail for logs (redacted upstream).
    detail: String,
}

/// How the deadline-bound part of the pipeline ended.
enum PipelineEnd {
    NoIssues,
    Findings(Vec<Finding>),
    Skipped(SkipReason),
}

pub struct Orchestrator {
    github: Arc<GithubClient>,
    gateway: Option<Arc<LlmGateway>>,
    admission: AdmissionController,
    publisher: Publisher,
    policy: SizePolicy,
    job_locks: StdMutex<HashMap<JobKey, Arc<AsyncMutex<()>>>>,
    job_slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        github: Arc<GithubClient>,
        gateway: Option<Arc<LlmGateway>>,
        admission: AdmissionController,
        publisher: Publisher,
        policy: SizePolicy,
    ) -> Self {
        Self {
            github,
            gateway,
            admission,
            publisher,
            policy,
            job_locks: StdMutex::new(HashMap::new()),
            job_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_JOBS)),
        }
    }

    /// Claim a job slot. `None` means the service is saturated and the
    /// dispatcher should refuse the event.
    pub fn try_begin(&self) -> Option<OwnedSemaphorePermit> {
        self.job_slots.clone().try_acquire_owned().ok()
    }

    /// Post the refusal notice for an event that found no free job slot.
    pub async fn refuse_saturated(&self, envelope: &EventEnvelope, trigger: Trigger) {
        let Some(pull_number) = envelope.pull_number else {
            return;
        };
        let job = ReviewJob::new(
            envelope.repo.clone(),
            pull_number,
            trigger,
            envelope.delivery_id.clone(),
        );
        if let Err(e) = self.publisher.post_rate_limit_notice(&job).await {
            warn!("failed to post saturation notice: {}", e);
        }
    }

    /// Reply to a help mention. No job slot needed; this is one comment.
    pub async fn post_help(&self, envelope: &EventEnvelope) {
        let Some(pull_number) = envelope.pull_number else {
            return;
        };
        let job = ReviewJob::new(
            envelope.repo.clone(),
            pull_number,
            Trigger::Manual,
            envelope.delivery_id.clone(),
        );
        if let Err(e) = self.publisher.post_help_comment(&job).await {
            warn!("failed to post help comment: {}", e);
        }
    }

    /// Run one review job to a terminal outcome. The permit is held for the
    /// job's lifetime and released on drop.
    pub async fn run(
        &self,
        envelope: EventEnvelope,
        trigger: Trigger,
        _permit: OwnedSemaphorePermit,
    ) -> ReviewOutcome {
        let Some(pull_number) = envelope.pull_number else {
            error!("envelope admitted without a pull number");
            return ReviewOutcome::Failed(FailureKind::Internal);
        };
        let job = ReviewJob::new(
            envelope.repo.clone(),
            pull_number,
            trigger,
            envelope.delivery_id.clone(),
        );

        info!(
            job_id = %job.id,
            repo = %job.repo.full_name,
            pr = job.pull_number,
            trigger = %trigger,
            "review job started"
        );

        let outcome = self.run_to_terminal(&job, &envelope).await;

        info!(
            job_id = %job.id,
            repo = %job.repo.full_name,
            pr = job.pull_number,
            trigger = %trigger,
            outcome = %outcome,
            "review job finished"
        );
        outcome
    }

    async fn run_to_terminal(&self, job: &ReviewJob, envelope: &EventEnvelope) -> ReviewOutcome {
        // Admitting: allow-list, then rate limit. A disallowed repository is
        // skipped silently; rate limiting is user-visible.
        match self.admission.admit(&job.repo, job.trigger) {
            AdmissionDecision::Admitted => {}
            AdmissionDecision::Disallowed => {
                info!(repo = %job.repo.full_name, "skipping disallowed repository");
                return ReviewOutcome::Skipped(SkipReason::Disallowed);
            }
            AdmissionDecision::RateLimited => {
                if let Err(e) = self.publisher.post_rate_limit_notice(job).await {
                    warn!("failed to post rate-limit notice: {}", e);
                }
                return ReviewOutcome::Skipped(SkipReason::RateLimited);
            }
        }

        // Snapshot the PR and its comment history concurrently; the comments
        // feed the dedup oracle before any expensive work starts.
        let cid = Some(job.delivery_id.as_str());
        let (details, comments) = tokio::join!(
            self.github
                .get_pull_request(cid, &job.repo.owner, &job.repo.name, job.pull_number),
            self.github
                .list_pr_comments(cid, &job.repo.owner, &job.repo.name, job.pull_number),
        );
        let details = match details {
            Ok(d) => d,
            Err(e) => {
                return self
                    .fail(job, None, github_failure(JobStage::Fetching, &e))
                    .await;
            }
        };
        // Dedup is best effort: a comment listing failure must not block a
        // review that could otherwise run.
        let comments = comments.unwrap_or_else(|e| {
            warn!("could not list PR comments for dedup: {}", e);
            Vec::new()
        });

        let head_sha = envelope
            .head_sha
            .clone()
            .unwrap_or_else(|| details.head.sha.clone());

        // One running job per head commit; a concurrent duplicate coalesces.
        let key = JobKey {
            full_name: job.repo.full_name.clone(),
            pull_number: job.pull_number,
            head_sha: head_sha.clone(),
        };
        let Some(_guard) = self.acquire_job_lock(&key) else {
            info!(
                repo = %job.repo.full_name,
                pr = job.pull_number,
                "another job is already running for this head commit"
            );
            return ReviewOutcome::Skipped(SkipReason::DuplicateRecent);
        };

        if is_duplicate_run(&comments, job.trigger, Utc::now()) {
            info!(
                repo = %job.repo.full_name,
                pr = job.pull_number,
                "recent review summary found, skipping automatic run"
            );
            self.release_job_lock(&key);
            return ReviewOutcome::Skipped(SkipReason::DuplicateRecent);
        }

        if let Err(e) = self
            .publisher
            .set_status(job, &head_sha, CommitState::Pending, "Review in progress")
            .await
        {
            warn!("could not set pending status: {}", e);
        }

        // Everything from here races the job deadline. The stage cell lets
        // the timeout handler report where the job actually was.
        let stage = Arc::new(StdMutex::new(JobStage::Fetching));
        let pipeline = self.run_pipeline(job, envelope, &details, &head_sha, stage.clone());
        let result = match tokio::time::timeout(job.deadline, pipeline).await {
            Ok(inner) => inner,
            Err(_) => {
                let at = *stage.lock().expect("stage cell poisoned");
                Err(StageFailure {
                    stage: at,
                    kind: FailureKind::Timeout,
                    message: MSG_TIMEOUT,
                    detail: format!("job deadline of {:?} elapsed", job.deadline),
                })
            }
        };

        let outcome = match result {
            Ok(PipelineEnd::NoIssues) => ReviewOutcome::NoIssues,
            Ok(PipelineEnd::Findings(findings)) => ReviewOutcome::Findings {
                count: findings.len(),
                max_severity: Finding::max_severity(&findings)
                    .unwrap_or(codecritics_core::findings::Severity::Medium),
            },
            Ok(PipelineEnd::Skipped(reason)) => ReviewOutcome::Skipped(reason),
            Err(failure) => self.fail(job, Some(&head_sha), failure).await,
        };
        self.release_job_lock(&key);
        outcome
    }

    /// Fetching through Publishing, under the deadline.
    async fn run_pipeline(
        &self,
        job: &ReviewJob,
        envelope: &EventEnvelope,
        details: &PullRequestDetails,
        head_sha: &str,
        stage: Arc<StdMutex<JobStage>>,
    ) -> Result<PipelineEnd, StageFailure> {
        let set_stage = |s: JobStage| {
            *stage.lock().expect("stage cell poisoned") = s;
        };
        let cid = Some(job.delivery_id.as_str());

        // Fetching: the diff and the changed-file list in parallel. The file
        // list is advisory (logging, future filters); only the diff gates
        // the pipeline.
        set_stage(JobStage::Fetching);
        let (diff, files) = tokio::join!(
            fetch_diff(
                &self.github,
                cid,
                &job.repo,
                details,
                envelope.diff_url.as_deref(),
            ),
            self.github
                .list_files(cid, &job.repo.owner, &job.repo.name, job.pull_number),
        );
        let diff = diff.map_err(|e| github_failure(JobStage::Fetching, &e))?;
        let files = files.unwrap_or_else(|e| {
            warn!("could not list changed files: {}", e);
            Vec::new()
        });
        let snapshot = PrSnapshot {
            number: details.number,
            title: details.title.clone(),
            body: details.body.clone(),
            head_sha: head_sha.to_string(),
            base_sha: details.base.sha.clone(),
            files,
            diff,
        };
        info!(
            repo = %job.repo.full_name,
            pr = snapshot.number,
            files = snapshot.files.len(),
            diff_bytes = snapshot.diff.len(),
            "fetched PR snapshot"
        );

        // Processing
        set_stage(JobStage::Processing);
        let reviewable = match self.policy.evaluate(&snapshot.diff) {
            DiffDecision::Proceed(text) => text,
            DiffDecision::NoSupportedFiles => {
                self.finish_skipped(job, head_sha, SkipReason::NoSupportedFiles)
                    .await;
                return Ok(PipelineEnd::Skipped(SkipReason::NoSupportedFiles));
            }
            DiffDecision::TooLarge => {
                self.finish_skipped(job, head_sha, SkipReason::DiffTooLarge)
                    .await;
                return Ok(PipelineEnd::Skipped(SkipReason::DiffTooLarge));
            }
        };

        // Prompting. Large diffs go to the model one file-boundary chunk at
        // a time; each call carries exactly one user message.
        set_stage(JobStage::Prompting);
        let Some(gateway) = &self.gateway else {
            return Err(StageFailure {
                stage: JobStage::Prompting,
                kind: FailureKind::ProviderUnavailable,
                message: MSG_AUTH,
                detail: "no LLM provider could be constructed".to_string(),
            });
        };
        let chunks = chunk_diff(&reviewable, DEFAULT_CHUNK_BYTES);
        let mut findings = Vec::new();
        for chunk in &chunks {
            set_stage(JobStage::Prompting);
            let request = CompletionRequest::new(
                system_prompt(),
                vec![ChatMessage::user(user_prompt(chunk))],
            );
            let reply = gateway
                .complete(&request)
                .await
                .map_err(|e| llm_failure(JobStage::Prompting, &e))?;

            // Parsing
            set_stage(JobStage::Parsing);
            findings.extend(parse_review_reply(&reply));
        }
        if findings.is_empty() {
            if let Err(e) = self.publisher.post_no_issues_summary(job).await {
                warn!("failed to post no-issues summary: {}", e);
            }
            if let Err(e) = self
                .publisher
                .set_status(job, head_sha, CommitState::Success, "No issues found")
                .await
            {
                warn!("could not set success status: {}", e);
            }
            return Ok(PipelineEnd::NoIssues);
        }

        // Clamp model-reported lines onto lines actually visible in the diff.
        let ranges = right_side_ranges(&reviewable);
        for finding in &mut findings {
            finding.line = clamp_line(&ranges, &finding.path, finding.line);
        }

        // Publishing. The review itself must succeed; the summary comment is
        // best effort on top of it.
        set_stage(JobStage::Publishing);
        self.publisher
            .publish_review(job, &findings)
            .await
            .map_err(|e| github_failure(JobStage::Publishing, &e))?;
        if let Err(e) = self.publisher.post_findings_summary(job, &findings).await {
            warn!("failed to post findings summary: {}", e);
        }

        set_stage(JobStage::Reporting);
        let description = format!("Found {} issue(s)", findings.len());
        if let Err(e) = self
            .publisher
            .set_status(job, head_sha, self.publisher.findings_state(), &description)
            .await
        {
            warn!("could not set findings status: {}", e);
        }

        Ok(PipelineEnd::Findings(findings))
    }

    /// Post the skip notice and mark the commit successful with a
    /// descriptive message.
    async fn finish_skipped(&self, job: &ReviewJob, head_sha: &str, reason: SkipReason) {
        if let Err(e) = self.publisher.post_skip_notice(job, reason).await {
            warn!("failed to post skip notice: {}", e);
        }
        let description = format!("Review skipped: {}", reason);
        if let Err(e) = self
            .publisher
            .set_status(job, head_sha, CommitState::Success, &description)
            .await
        {
            warn!("could not set skip status: {}", e);
        }
    }

    /// Terminal failure handling: sanitized comment, error status, log.
    async fn fail(
        &self,
        job: &ReviewJob,
        head_sha: Option<&str>,
        failure: StageFailure,
    ) -> ReviewOutcome {
        error!(
            job_id = %job.id,
            repo = %job.repo.full_name,
            pull_number = job.pull_number,
            trigger = %job.trigger,
            stage = %failure.stage,
            kind = %failure.kind,
            detail = %failure.detail,
            "review job failed"
        );

        if let Err(e) = self.publisher.post_failure_notice(job, failure.message).await {
            warn!("failed to post failure notice: {}", e);
        }
        if let Some(sha) = head_sha {
            if let Err(e) = self
                .publisher
                .set_status(job, sha, CommitState::Error, "Review failed")
                .await
            {
                warn!("could not set error status: {}", e);
            }
        }

        ReviewOutcome::Failed(failure.kind)
    }

    /// Try to take the per-key lock without waiting. `None` means another
    /// job for the same key is running.
    fn acquire_job_lock(&self, key: &JobKey) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.job_locks.lock().expect("job lock table poisoned");
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Drop the key's map entry once no other job holds a reference to it.
    fn release_job_lock(&self, key: &JobKey) {
        let mut locks = self.job_locks.lock().expect("job lock table poisoned");
        if let Some(lock) = locks.get(key) {
            // Two references: the map's and the one we are inspecting.
            if Arc::strong_count(lock) <= 2 {
                locks.remove(key);
            }
        }
    }
}

fn github_failure(stage: JobStage, err: &GithubError) -> StageFailure {
    let (kind, message) = if err.is_auth() {
        (FailureKind::Permanent, MSG_AUTH)
    } else if err.is_retriable() {
        (FailureKind::Transient, MSG_NETWORK)
    } else {
        (FailureKind::Permanent, MSG_UNEXPECTED)
    };
    StageFailure {
        stage,
        kind,
        message,
        detail: err.to_string(),
    }
}

fn llm_failure(stage: JobStage, err: &LlmError) -> StageFailure {
    let (kind, message) = match err {
        LlmError::Authentication(_) => (FailureKind::Permanent, MSG_AUTH),
        LlmError::Configuration(_) => (FailureKind::ProviderUnavailable, MSG_AUTH),
        LlmError::RateLimited { .. } => (FailureKind::Transient, MSG_RATE_LIMIT),
        LlmError::Timeout(_) => (FailureKind::Timeout, MSG_TIMEOUT),
        LlmError::Network(_) => (FailureKind::Transient, MSG_NETWORK),
        LlmError::Api { status, .. } if *status >= 500 => (FailureKind::Transient, MSG_NETWORK),
        LlmError::Api { .. } | LlmError::InvalidResponse(_) => {
            (FailureKind::Permanent, MSG_UNEXPECTED)
        }
    };
    StageFailure {
        stage,
        kind,
        message,
        detail: err.to_string(),
    }
}
