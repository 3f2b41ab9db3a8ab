//! Tolerant parser for the block-structured review reply.
//!
//! The model is instructed to emit findings separated by `---` lines, each
//! finding a run of `**Label**: value` lines. Real model output drifts from
//! the contract in small ways (missing fields, extra prose, stray backticks),
//! so the parser recovers what it can and drops what it cannot; it never
//! fails on malformed input.

use tracing::debug;

use crate::findings::{Finding, Severity};

/// Exact sentinel the model emits when it has nothing to report.
pub const NO_ISSUES_SENTINEL: &str = "No significant issues found. Good job!";

const DEFAULT_ISSUE_TYPE: &str = "Code Issue";
const DEFAULT_DESCRIPTION: &str = "No description provided";
const DEFAULT_SUGGESTION: &str = "No specific change suggested";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Location,
    IssueType,
    Description,
    Severity,
    SuggestedChange,
}

impl Label {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "location" => Some(Self::Location),
            "issue type" => Some(Self::IssueType),
            "description" => Some(Self::Description),
            "severity" => Some(Self::Severity),
            "suggested change" => Some(Self::SuggestedChange),
            _ => None,
        }
    }
}

/// Parse a model reply into findings. Returns an empty list for the
/// no-issues sentinel; malformed blocks are logged and skipped.
pub fn parse_review_reply(reply: &str) -> Vec<Finding> {
    if reply.contains(NO_ISSUES_SENTINEL) {
        return Vec::new();
    }

    let mut findings = Vec::new();
    for block in split_blocks(reply) {
        match parse_block(&block) {
            Some(finding) => findings.push(finding),
            None => {
                let preview: String = block.chars().take(80).collect();
                debug!(block = %preview, "dropping unparseable finding block");
            }
        }
    }
    findings
}

/// Split the reply at separator lines containing only `---`.
fn split_blocks(reply: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in reply.lines() {
        if line.trim() == "---" {
            blocks.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    blocks.push(current);
    blocks.retain(|b| !b.trim().is_empty());
    blocks
}

/// Recognize a `**Label**: value` line. Returns the label and the raw value
/// remainder (which may be empty).
fn match_label(line: &str) -> Option<(Label, &str)> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("**")?;
    let close = rest.find("**")?;
    let label = Label::from_name(&rest[..close])?;
    let after = rest[close + 2..].strip_prefix(':')?;
    Some((label, after.trim_start()))
}

/// Parse `path[:line]` out of a Location value, stripping backticks. A
/// missing or unparseable line defaults to 1.
fn parse_location(value: &str) -> Option<(String, u64)> {
    let cleaned = value.replace('`', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Some((path, line)) = cleaned.rsplit_once(':') {
        if let Ok(n) = line.trim().parse::<u64>() {
            if n >= 1 && !path.trim().is_empty() {
                return Some((path.trim().to_string(), n));
            }
        }
    }
    Some((cleaned.to_string(), 1))
}

fn parse_block(block: &str) -> Option<Finding> {
    let mut path: Option<(String, u64)> = None;
    let mut issue_type: Option<String> = None;
    let mut severity: Option<Severity> = None;
    let mut description: Option<String> = None;
    let mut suggestion: Option<String> = None;
    // Which multi-line-capable field unlabeled lines continue.
    let mut continuation: Option<Label> = None;

    for line in block.lines() {
        // Marker lines (our own HTML comments) are metadata, not content.
        if line.trim_start().starts_with("<!--") {
            continue;
        }
        if let Some((label, value)) = match_label(line) {
            match label {
                Label::Location => {
                    path = parse_location(value);
                    continuation = None;
                }
                Label::IssueType => {
                    issue_type = Some(value.trim().to_string());
                    continuation = None;
                }
                Label::Severity => {
                    severity = Some(Severity::parse(value));
                    continuation = None;
                }
                Label::Description => {
                    description = Some(value.trim_end().to_string());
                    continuation = Some(Label::Description);
                }
                Label::SuggestedChange => {
                    suggestion = Some(value.trim_end().to_string());
                    continuation = Some(Label::SuggestedChange);
                }
            }
        } else {
            let target = match continuation {
                Some(Label::Description) => description.as_mut(),
                Some(Label::SuggestedChange) => suggestion.as_mut(),
                _ => None,
            };
            if let Some(text) = target {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(line.trim_end());
            }
        }
    }

    // A block is only a finding if the model named a file and said something
    // about it; everything else has a default.
    let (path, line) = path?;
    let description = match description.map(|d| d.trim_end().to_string()) {
        Some(d) if !d.trim().is_empty() => d,
        Some(_) => DEFAULT_DESCRIPTION.to_string(),
        None => return None,
    };
    let suggestion = suggestion.map(|s| s.trim_end().to_string());

    Some(Finding {
        path,
        line,
        issue_type: non_empty_or(issue_type, DEFAULT_ISSUE_TYPE),
        severity: severity.unwrap_or(Severity::Medium),
        description,
        suggestion: non_empty_or(suggestion, DEFAULT_SUGGESTION),
    })
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed_block(path: &str, line: u64) -> String {
        format!(
            "**Location**: `{path}:{line}`\n\
             **Issue Type**: Security Vulnerability\n\
             **Description**: SQL built by string concatenation\n\
             **Severity**: High\n\
             **Suggested Change**: Use a parameterized query\n"
        )
    }

    #[test]
    fn test_no_issues_sentinel_short_circuits() {
        let reply = format!("{}\n\nKeep up the good work.", NO_ISSUES_SENTINEL);
        assert!(parse_review_reply(&reply).is_empty());
    }

    #[test]
    fn test_single_block() {
        let findings = parse_review_reply(&well_formed_block("src/db.rs", 88));
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.path, "src/db.rs");
        assert_eq!(f.line, 88);
        assert_eq!(f.issue_type, "Security Vulnerability");
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.description, "SQL built by string concatenation");
        assert_eq!(f.suggestion, "Use a parameterized query");
    }

    #[test]
    fn test_multiple_blocks_separated_by_dashes() {
        let reply = format!(
            "{}\n---\n{}",
            well_formed_block("a.rs", 1),
            well_formed_block("b.rs", 2)
        );
        let findings = parse_review_reply(&reply);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].path, "a.rs");
        assert_eq!(findings[1].path, "b.rs");
    }

    #[test]
    fn test_location_without_line_defaults_to_one() {
        let reply = "**Location**: src/lib.rs\n**Description**: something\n";
        let findings = parse_review_reply(reply);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 1);
    }

    #[test]
    fn test_location_with_garbage_line_defaults_to_one() {
        let reply = "**Location**: src/lib.rs:abc\n**Description**: something\n";
        let findings = parse_review_reply(reply);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path, "src/lib.rs:abc");
        assert_eq!(findings[0].line, 1);
    }

    #[test]
    fn test_block_without_location_is_dropped() {
        let reply = "**Description**: orphaned prose\n**Severity**: High\n";
        assert!(parse_review_reply(reply).is_empty());
    }

    #[test]
    fn test_block_without_description_is_dropped() {
        let reply = "**Location**: a.rs:3\n**Severity**: High\n";
        assert!(parse_review_reply(reply).is_empty());
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let reply = "**Location**: a.rs:3\n**Description**: uninitialized read\n";
        let findings = parse_review_reply(reply);
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.issue_type, DEFAULT_ISSUE_TYPE);
        assert_eq!(f.severity, Severity::Medium);
        assert_eq!(f.suggestion, DEFAULT_SUGGESTION);
    }

    #[test]
    fn test_multiline_suggestion_continuation() {
        let reply = "\
**Location**: a.rs:3
**Description**: bad loop
**Suggested Change**: Replace with:
for item in items {
    process(item);
}
";
        let findings = parse_review_reply(reply);
        assert_eq!(findings.len(), 1);
        let suggestion = &findings[0].suggestion;
        assert!(suggestion.starts_with("Replace with:"));
        assert!(suggestion.contains("for item in items {"));
        assert!(suggestion.contains("    process(item);"));
    }

    #[test]
    fn test_continuation_ends_at_next_label() {
        let reply = "\
**Location**: a.rs:3
**Description**: first line
second line of description
**Severity**: Low
";
        let findings = parse_review_reply(reply);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].description,
            "first line\nsecond line of description"
        );
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn test_preamble_prose_is_ignored() {
        let reply = format!(
            "I reviewed the changes and found one issue.\n\n---\n{}",
            well_formed_block("a.rs", 9)
        );
        let findings = parse_review_reply(&reply);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path, "a.rs");
    }

    #[test]
    fn test_never_panics_on_garbage() {
        for garbage in [
            "",
            "---",
            "---\n---\n---",
            "**Location**:",
            "**Location**: ``",
            "**Unknown**: value",
            "\u{0}\u{1}binary",
            "**Location**: a.rs:0\n**Description**: zero line",
        ] {
            let _ = parse_review_reply(garbage);
        }
    }

    #[test]
    fn test_zero_line_treated_as_unparseable() {
        // ":0" fails the positive-integer rule, so the whole value is the path.
        let findings =
            parse_review_reply("**Location**: a.rs:0\n**Description**: zero line\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].path, "a.rs:0");
        assert_eq!(findings[0].line, 1);
    }

    #[test]
    fn test_rendered_finding_reparses() {
        // Round-trip: a rendered comment body is itself a parseable block
        // once a Location is prepended.
        let original = parse_review_reply(&well_formed_block("x.rs", 7)).remove(0);
        let rendered = format!("**Location**: x.rs:7\n{}", original.render_comment_body());
        let reparsed = parse_review_reply(&rendered).remove(0);
        assert_eq!(original, reparsed);
    }
}
