//! Structural validation of the webhook envelope.
//!
//! GitHub delivers loosely-shaped JSON; every field we rely on downstream is
//! checked here so the rest of the pipeline works with a typed
//! [`EventEnvelope`] and never touches raw payload again.

use serde::Deserialize;

/// Mention that triggers a manual re-review from a PR comment.
pub const MENTION_TOKEN: &str = "@codecritics";

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub repository: Option<Repository>,
    pub pull_request: Option<PullRequest>,
    pub comment: Option<Comment>,
    pub issue: Option<Issue>,
    pub sender: Option<User>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub owner: Option<User>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: Option<u64>,
    pub diff_url: Option<String>,
    pub head: Option<PrRef>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrRef {
    pub sha: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub body: Option<String>,
    pub user: Option<User>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: Option<u64>,
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: Option<String>,
}

/// Repository coordinates carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PrChanged,
    MentionComment,
    Ping,
    Other,
}

/// Validated, immutable view of one delivery. Invariants: a `PrChanged`
/// envelope has `pull_number` and `diff_url` (`head_sha` rides along when
/// the payload supplies it); a `MentionComment` envelope has `pull_number`
/// and a body containing [`MENTION_TOKEN`].
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub delivery_id: String,
    pub kind: EventKind,
    pub action: String,
    pub repo: RepoRef,
    pub pull_number: Option<u64>,
    pub diff_url: Option<String>,
    pub head_sha: Option<String>,
    pub comment_body: Option<String>,
    pub commenter: Option<String>,
}

/// What the dispatcher should do with a delivery.
#[derive(Debug, Clone)]
pub enum Classification {
    Ping,
    /// Run an automatic review.
    PrChanged(EventEnvelope),
    /// Run a manual review.
    MentionComment(EventEnvelope),
    /// Acknowledged but not handled.
    Ignored { reason: String },
}

const PR_CHANGED_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

/// Classify a delivery. Returns the accumulated field errors when the
/// payload is structurally invalid for its event kind.
pub fn classify_payload(
    event: &str,
    delivery_id: &str,
    payload: &WebhookPayload,
) -> Result<Classification, Vec<String>> {
    if event == "ping" {
        return Ok(Classification::Ping);
    }

    let mut errors = Vec::new();

    let action = match &payload.action {
        Some(a) => a.clone(),
        None => {
            errors.push("action: expected a string".to_string());
            String::new()
        }
    };

    let repo = match validate_repo(payload) {
        Ok(repo) => Some(repo),
        Err(mut repo_errors) => {
            errors.append(&mut repo_errors);
            None
        }
    };

    match event {
        "pull_request" if PR_CHANGED_ACTIONS.contains(&action.as_str()) => {
            let pr = payload.pull_request.as_ref();
            let pull_number = pr.and_then(|p| p.number);
            if pull_number.is_none() {
                errors.push("pull_request.number: expected an integer".to_string());
            }
            let diff_url = pr.and_then(|p| p.diff_url.clone());
            if diff_url.is_none() {
                errors.push("pull_request.diff_url: expected a string".to_string());
            }
            // The head SHA is carried when present; the orchestrator falls
            // back to the fetched PR details otherwise.
            let head_sha = pr.and_then(|p| p.head.as_ref()).and_then(|h| h.sha.clone());

            if !errors.is_empty() {
                return Err(errors);
            }
            Ok(Classification::PrChanged(EventEnvelope {
                delivery_id: delivery_id.to_string(),
                kind: EventKind::PrChanged,
                action,
                repo: repo.expect("repo errors already collected"),
                pull_number,
                diff_url,
                head_sha,
                comment_body: None,
                commenter: sender_login(payload),
            }))
        }
        "issue_comment" if action == "created" => {
            let on_pull_request = payload
                .issue
                .as_ref()
                .map(|i| i.pull_request.is_some())
                .unwrap_or(false);
            if !on_pull_request {
                return Ok(Classification::Ignored {
                    reason: "comment is not on a pull request".to_string(),
                });
            }

            let body = payload
                .comment
                .as_ref()
                .and_then(|c| c.body.clone())
                .unwrap_or_default();
            if !body.to_lowercase().contains(MENTION_TOKEN) {
                return Ok(Classification::Ignored {
                    reason: "comment does not mention the bot".to_string(),
                });
            }

            let pull_number = payload.issue.as_ref().and_then(|i| i.number);
            if pull_number.is_none() {
                errors.push("issue.number: expected an integer".to_string());
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            Ok(Classification::MentionComment(EventEnvelope {
                delivery_id: delivery_id.to_string(),
                kind: EventKind::MentionComment,
                action,
                repo: repo.expect("repo errors already collected"),
                pull_number,
                diff_url: None,
                head_sha: None,
                comment_body: Some(body),
                commenter: payload
                    .comment
                    .as_ref()
                    .and_then(|c| c.user.as_ref())
                    .and_then(|u| u.login.clone()),
            }))
        }
        _ => {
            // Structural minimums still apply to events we acknowledge.
            if !errors.is_empty() {
                return Err(errors);
            }
            Ok(Classification::Ignored {
                reason: format!("event '{}' (action '{}') is not handled", event, action),
            })
        }
    }
}

fn validate_repo(payload: &WebhookPayload) -> Result<RepoRef, Vec<String>> {
    let mut errors = Vec::new();
    let repo = match &payload.repository {
        Some(r) => r,
        None => return Err(vec!["repository: expected an object".to_string()]),
    };

    let full_name = match &repo.full_name {
        Some(f) => f.clone(),
        None => {
            errors.push("repository.full_name: expected a string".to_string());
            return Err(errors);
        }
    };

    // owner/name are derivable from full_name when the payload omits them.
    let (owner_from_full, name_from_full) = match full_name.split_once('/') {
        Some((o, n)) => (o.to_string(), n.to_string()),
        None => {
            errors.push("repository.full_name: expected 'owner/name'".to_string());
            return Err(errors);
        }
    };
    let owner = repo
        .owner
        .as_ref()
        .and_then(|u| u.login.clone())
        .unwrap_or(owner_from_full);
    let name = repo.name.clone().unwrap_or(name_from_full);

    Ok(RepoRef {
        owner,
        name,
        full_name,
        private: repo.private,
    })
}

fn sender_login(payload: &WebhookPayload) -> Option<String> {
    payload.sender.as_ref().and_then(|u| u.login.clone())
}
