//! HTML-comment markers embedded in every bot-posted body.
//!
//! Markers let later runs recognize their own output among arbitrary PR
//! comments: the summary marker identifies a completed review, the inline
//! marker tags per-finding comments, and the timestamp marker carries the
//! posting time used by the dedup oracle.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Marks a PR-level summary comment.
pub const SUMMARY_MARKER: &str = "<!-- code-critics-review -->";

/// Marks an inline review comment.
pub const INLINE_MARKER: &str = "<!-- code-critics-comment -->";

const TIMESTAMP_PREFIX: &str = "<!-- timestamp: ";
const TIMESTAMP_SUFFIX: &str = " -->";

/// How long a prior summary suppresses a new automatic run.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Render a timestamp marker for the given instant (epoch milliseconds).
pub fn timestamp_marker(at: DateTime<Utc>) -> String {
    format!("{}{}{}", TIMESTAMP_PREFIX, at.timestamp_millis(), TIMESTAMP_SUFFIX)
}

/// True if the body carries the summary marker.
pub fn is_summary_comment(body: &str) -> bool {
    body.contains(SUMMARY_MARKER)
}

/// Extract the epoch-millisecond timestamp embedded in a bot comment body.
pub fn extract_timestamp(body: &str) -> Option<i64> {
    let start = body.find(TIMESTAMP_PREFIX)? + TIMESTAMP_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(TIMESTAMP_SUFFIX)?;
    rest[..end].trim().parse().ok()
}

/// True if the body's embedded timestamp falls within `window` of `now`.
/// Bodies without a parseable timestamp are never recent.
pub fn is_recent(body: &str, now: DateTime<Utc>, window: Duration) -> bool {
    match extract_timestamp(body) {
        // A negative age means the poster's clock ran ahead of ours; treat
        // that as recent rather than letting skew defeat deduplication.
        Some(ms) => {
            let age_ms = now.timestamp_millis() - ms;
            age_ms <= window.as_millis() as i64
        }
        None => false,
    }
}
