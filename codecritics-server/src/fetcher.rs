//! Retrieves the unified diff for a pull request.
//!
//! The webhook envelope carries a ready-made `diff_url`, which saves an API
//! round trip but is attacker-influenced input: it is only used after a
//! strict shape check (scheme, host, and path must all look like the PR it
//! claims to be). Anything else falls back to the compare-commits API.

use tracing::warn;
use url::Url;

use crate::event::RepoRef;
use crate::github::{GithubClient, GithubResult, PullRequestDetails};

const ALLOWED_HOST_DOMAINS: &[&str] = &["github.com", "githubusercontent.com"];

/// Validate a caller-supplied diff URL against the PR it should describe.
///
/// Requirements: http(s) scheme; host is one of the GitHub serving domains
/// (exact or dot-bounded subdomain); the path contains the `owner/repo`
/// segment pair followed by a `pull/<number>` pair. Extensions like
/// `7.diff` count as the number segment.
pub fn validate_diff_url(raw: &str, owner: &str, repo: &str, number: u64) -> bool {
    let url = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let host = match url.host_str() {
        Some(h) => h.to_lowercase(),
        None => return false,
    };
    let host_allowed = ALLOWED_HOST_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));
    if !host_allowed {
        return false;
    }

    let segments: Vec<&str> = match url.path_segments() {
        Some(s) => s.collect(),
        None => return false,
    };

    let owner_repo_at = segments
        .windows(2)
        .position(|w| w[0] == owner && w[1] == repo);
    let Some(pos) = owner_repo_at else {
        return false;
    };

    segments[pos + 2..]
        .windows(2)
        .any(|w| w[0] == "pull" && number_segment_matches(w[1], number))
}

/// `7`, `7.diff`, and `7.patch` all name PR 7.
fn number_segment_matches(segment: &str, number: u64) -> bool {
    segment
        .split('.')
        .next()
        .and_then(|digits| digits.parse::<u64>().ok())
        == Some(number)
}

/// Fetch the diff, preferring a validated `diff_url` over the compare API.
///
/// A `diff_url` that fails validation silently degrades to the compare
/// fallback; a fetch that fails after validation is a real error and
/// propagates (the orchestrator decides retriability from it).
pub async fn fetch_diff(
    github: &GithubClient,
    correlation_id: Option<&str>,
    repo: &RepoRef,
    pr: &PullRequestDetails,
    diff_url: Option<&str>,
) -> GithubResult<String> {
    if let Some(url) = diff_url {
        if validate_diff_url(url, &repo.owner, &repo.name, pr.number) {
            return github.fetch_diff_url(correlation_id, url).await;
        }
        warn!(
            repo = %repo.full_name,
            pr = pr.number,
            "diff URL failed validation, using compare API"
        );
    }

    github
        .compare_commits_diff(
            correlation_id,
            &repo.owner,
            &repo.name,
            &pr.base.sha,
            &pr.head.sha,
        )
        .await
}
