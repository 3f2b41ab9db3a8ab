/// Parsing for @codecritics mentions in PR comments.
use std::fmt;

use crate::event::MENTION_TOKEN;

/// What a mention asks for. Any mention runs a review unless it explicitly
/// asks for help, so typos still do the obvious thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionCommand {
    /// Run a manual review (bare mention, `review`, or anything else).
    Review,
    /// Reply with the list of commands.
    Help,
}

impl fmt::Display for MentionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MentionCommand::Review => write!(f, "review"),
            MentionCommand::Help => write!(f, "help"),
        }
    }
}

/// Result of scanning a comment body for a mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    Command(MentionCommand),
    NoMention,
}

/// Scan a comment body for the mention and the word following it.
///
/// The mention may appear anywhere in the body (comments quote and reply
/// freely); matching is case-insensitive. Only the first mention counts.
pub fn parse_comment(body: &str) -> ParseResult {
    // All matching happens on the lowercased copy; byte offsets into the
    // original are not safe once case folding has run.
    let lower = body.to_lowercase();
    let mut remaining = lower.as_str();

    while let Some(start) = remaining.find(MENTION_TOKEN) {
        let rest = &remaining[start + MENTION_TOKEN.len()..];

        // A word glued onto the mention is somebody else's handle, e.g.
        // "@codecriticsfan". Skip it and keep scanning.
        if rest
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            remaining = rest;
            continue;
        }

        let command_word = rest.split_whitespace().next().unwrap_or("");
        return if command_word == "help" {
            ParseResult::Command(MentionCommand::Help)
        } else {
            ParseResult::Command(MentionCommand::Review)
        };
    }

    ParseResult::NoMention
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_mention_is_review() {
        assert_eq!(
            parse_comment("@codecritics"),
            ParseResult::Command(MentionCommand::Review)
        );
    }

    #[test]
    fn test_explicit_review_word() {
        assert_eq!(
            parse_comment("hey @codecritics review please"),
            ParseResult::Command(MentionCommand::Review)
        );
    }

    #[test]
    fn test_help_command() {
        assert_eq!(
            parse_comment("@codecritics help"),
            ParseResult::Command(MentionCommand::Help)
        );
        assert_eq!(
            parse_comment("@CodeCritics HELP"),
            ParseResult::Command(MentionCommand::Help)
        );
    }

    #[test]
    fn test_unknown_word_still_reviews() {
        assert_eq!(
            parse_comment("@codecritics revew"),
            ParseResult::Command(MentionCommand::Review)
        );
    }

    #[test]
    fn test_mention_mid_sentence() {
        assert_eq!(
            parse_comment("I think @codecritics should take another look"),
            ParseResult::Command(MentionCommand::Review)
        );
    }

    #[test]
    fn test_no_mention() {
        assert_eq!(parse_comment("looks good to me"), ParseResult::NoMention);
        assert_eq!(parse_comment(""), ParseResult::NoMention);
    }

    #[test]
    fn test_glued_handle_is_not_a_mention() {
        assert_eq!(parse_comment("cc @codecriticsfan"), ParseResult::NoMention);
    }

    #[test]
    fn test_glued_handle_followed_by_real_mention() {
        assert_eq!(
            parse_comment("@codecriticsfan ask @codecritics help"),
            ParseResult::Command(MentionCommand::Help)
        );
    }
}
