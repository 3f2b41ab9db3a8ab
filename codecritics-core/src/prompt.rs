//! Prompt construction for the review call.

/// System prompt sent with every review request. The reply format it
/// mandates is what [`crate::parser`] understands; change them together.
pub fn system_prompt() -> &'static str {
    include_str!("prompt.txt")
}

/// Build the user message for a review: the diff, fenced so the model
/// cannot confuse diff content with instructions.
pub fn user_prompt(diff: &str) -> String {
    format!(
        "Review the following pull request diff:\n\n```diff\n{}\n```\n",
        diff
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::NO_ISSUES_SENTINEL;

    #[test]
    fn test_system_prompt_mandates_the_parser_contract() {
        let prompt = system_prompt();
        for label in [
            "**Location**:",
            "**Issue Type**:",
            "**Description**:",
            "**Severity**:",
            "**Suggested Change**:",
        ] {
            assert!(prompt.contains(label), "missing {label}");
        }
        assert!(prompt.contains(NO_ISSUES_SENTINEL));
        assert!(prompt.contains("---"));
    }

    #[test]
    fn test_user_prompt_fences_the_diff() {
        let p = user_prompt("diff --git a/x b/x\n+1\n");
        assert!(p.contains("```diff\n"));
        assert!(p.contains("+1\n"));
        assert!(p.trim_end().ends_with("```"));
    }
}
