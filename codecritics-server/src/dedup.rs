//! Decides whether an automatic run would duplicate a recent review.
//!
//! The evidence is the PR's own comment history: every summary the bot posts
//! carries a marker plus an embedded timestamp. No state survives restarts,
//! so a redelivered webhook is caught here rather than by a database.

use chrono::{DateTime, Utc};

use crate::github::IssueComment;
use crate::outcome::Trigger;
use codecritics_core::markers::{is_recent, is_summary_comment, DEDUP_WINDOW};

/// The most recent bot summary among `comments`, if any.
pub fn latest_bot_summary(comments: &[IssueComment]) -> Option<&IssueComment> {
    comments
        .iter()
        .filter(|c| is_summary_comment(&c.body))
        .max_by_key(|c| codecritics_core::markers::extract_timestamp(&c.body).unwrap_or(i64::MIN))
}

/// Whether this run should be skipped as a duplicate.
///
/// Only automatic runs are ever deduplicated; a manual mention is an explicit
/// human request and always proceeds.
pub fn is_duplicate_run(comments: &[IssueComment], trigger: Trigger, now: DateTime<Utc>) -> bool {
    if trigger == Trigger::Manual {
        return false;
    }
    match latest_bot_summary(comments) {
        Some(summary) => is_recent(&summary.body, now, DEDUP_WINDOW),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::CommentUser;
    use chrono::Duration as ChronoDuration;
    use codecritics_core::markers::{timestamp_marker, SUMMARY_MARKER};

    fn comment(id: u64, body: String) -> IssueComment {
        IssueComment {
            id,
            body,
            user: CommentUser {
                login: "code-critics[bot]".to_string(),
            },
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn summary_at(id: u64, at: DateTime<Utc>) -> IssueComment {
        comment(
            id,
            format!("Review done.\n\n{}\n{}\n", SUMMARY_MARKER, timestamp_marker(at)),
        )
    }

    #[test]
    fn test_no_comments_is_not_duplicate() {
        assert!(!is_duplicate_run(&[], Trigger::Auto, Utc::now()));
    }

    #[test]
    fn test_recent_summary_dedups_auto_run() {
        let now = Utc::now();
        let comments = vec![summary_at(1, now - ChronoDuration::minutes(10))];
        assert!(is_duplicate_run(&comments, Trigger::Auto, now));
    }

    #[test]
    fn test_stale_summary_does_not_dedup() {
        let now = Utc::now();
        let comments = vec![summary_at(1, now - ChronoDuration::hours(2))];
        assert!(!is_duplicate_run(&comments, Trigger::Auto, now));
    }

    #[test]
    fn test_manual_trigger_is_never_deduped() {
        let now = Utc::now();
        let comments = vec![summary_at(1, now - ChronoDuration::minutes(10))];
        assert!(!is_duplicate_run(&comments, Trigger::Manual, now));
    }

    #[test]
    fn test_ordinary_comments_are_ignored() {
        let now = Utc::now();
        let comments = vec![
            comment(1, "LGTM".to_string()),
            comment(2, "please fix the test".to_string()),
        ];
        assert!(!is_duplicate_run(&comments, Trigger::Auto, now));
    }

    #[test]
    fn test_latest_summary_wins() {
        let now = Utc::now();
        let comments = vec![
            summary_at(1, now - ChronoDuration::hours(3)),
            summary_at(2, now - ChronoDuration::minutes(5)),
        ];
        // The stale one alone would not dedup, but the newer one does.
        assert_eq!(latest_bot_summary(&comments).unwrap().id, 2);
        assert!(is_duplicate_run(&comments, Trigger::Auto, now));
    }

    #[test]
    fn test_summary_without_timestamp_is_not_recent() {
        let now = Utc::now();
        let comments = vec![comment(1, format!("old format\n{}\n", SUMMARY_MARKER))];
        assert!(!is_duplicate_run(&comments, Trigger::Auto, now));
    }
}
