//! Core review logic for the code-critics bot.
//!
//! Everything in this crate is pure with respect to the outside world: no
//! HTTP, no clock reads beyond what callers pass in. The server crate wires
//! these pieces into the webhook pipeline.

pub mod diff;
pub mod findings;
pub mod markers;
pub mod parser;
pub mod prompt;
pub mod sanitize;

pub use diff::{chunk_diff, DiffDecision, SizePolicy};
pub use findings::{Finding, Severity};
pub use markers::{INLINE_MARKER, SUMMARY_MARKER};
pub use parser::{parse_review_reply, NO_ISSUES_SENTINEL};
pub use sanitize::{redact_secrets, Sanitizer};
