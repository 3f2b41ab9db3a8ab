//! The typed finding model produced by parsing a model reply, and the stable
//! comment bodies rendered from it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::markers::INLINE_MARKER;

/// Severity of a finding. Unrecognized model output normalizes to `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Normalize free-text severity from the model. Matching is by prefix so
    /// that e.g. "Critical - memory safety" still maps correctly.
    pub fn parse(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("critical") {
            Self::Critical
        } else if lower.starts_with("high") {
            Self::High
        } else if lower.starts_with("low") {
            Self::Low
        } else {
            Self::Medium
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        };
        write!(f, "{}", s)
    }
}

/// A single issue extracted from the model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Repository-relative path. Never empty; blocks without a path are
    /// dropped during parsing.
    pub path: String,
    /// 1-based line on the right side of the diff.
    pub line: u64,
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
}

impl Finding {
    /// Render the inline-comment body for this finding. The field labels and
    /// their order are stable; downstream tooling matches on them.
    pub fn render_comment_body(&self) -> String {
        format!(
            "**Issue Type**: {}\n**Description**: {}\n**Severity**: {}\n**Suggested Change**: {}\n\n{}\n",
            self.issue_type, self.description, self.severity, self.suggestion, INLINE_MARKER
        )
    }

    /// Highest severity across a set of findings, if any.
    pub fn max_severity(findings: &[Finding]) -> Option<Severity> {
        findings.iter().map(|f| f.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse_normalizes() {
        assert_eq!(Severity::parse("Critical"), Severity::Critical);
        assert_eq!(Severity::parse("  high "), Severity::High);
        assert_eq!(Severity::parse("LOW"), Severity::Low);
        assert_eq!(Severity::parse("Critical - use after free"), Severity::Critical);
        assert_eq!(Severity::parse("whatever"), Severity::Medium);
        assert_eq!(Severity::parse(""), Severity::Medium);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_render_contains_labels_in_order() {
        let finding = Finding {
            path: "src/auth.rs".to_string(),
            line: 42,
            issue_type: "Security Vulnerability".to_string(),
            severity: Severity::High,
            description: "Token compared with ==".to_string(),
            suggestion: "Use a constant-time comparison".to_string(),
        };
        let body = finding.render_comment_body();

        let labels = [
            "**Issue Type**:",
            "**Description**:",
            "**Severity**:",
            "**Suggested Change**:",
        ];
        let mut last = 0;
        for label in labels {
            let pos = body[last..].find(label).expect(label);
            last += pos;
        }
        assert!(body.contains(INLINE_MARKER));
    }

    #[test]
    fn test_max_severity() {
        let mk = |sev| Finding {
            path: "a.rs".to_string(),
            line: 1,
            issue_type: "Code Issue".to_string(),
            severity: sev,
            description: "d".to_string(),
            suggestion: "s".to_string(),
        };
        assert_eq!(Finding::max_severity(&[]), None);
        assert_eq!(
            Finding::max_severity(&[mk(Severity::Low), mk(Severity::Critical), mk(Severity::Medium)]),
            Some(Severity::Critical)
        );
    }
}
