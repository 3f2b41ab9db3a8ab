//! Unified-diff processing: file-boundary chunking, extension filtering,
//! and the size-adaptive skip policy.
//!
//! A diff is treated as a sequence of file sections, each beginning with a
//! `diff --git ` header line. Chunking and filtering both operate on whole
//! sections so that no chunk ever straddles a file boundary.

use std::collections::HashMap;

/// Marker that begins every per-file section of a unified diff.
const FILE_BOUNDARY: &str = "diff --git ";

/// Default byte budget for a single chunk sent to the model.
pub const DEFAULT_CHUNK_BYTES: usize = 50_000;

/// Default threshold at which the extension filter kicks in.
pub const DEFAULT_MAX_DIFF_BYTES: usize = 100_000;

/// A filtered diff may still exceed the threshold by this factor before the
/// review is skipped entirely.
pub const LARGE_DIFF_MULTIPLIER: f64 = 1.5;

/// Extensions reviewed by default. Overridable via configuration.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".ts", ".js", ".jsx", ".tsx", ".py", ".java", ".cpp", ".c", ".go", ".rs", ".php", ".rb",
    ".cs", ".swift", ".kt", ".scala", ".sh", ".sql", ".json", ".yaml", ".yml", ".md",
];

/// Split a diff into sections, each starting at a `diff --git ` boundary.
///
/// Any content before the first boundary (rare, but some generators emit a
/// preamble) becomes its own leading section. Concatenating the returned
/// slices reproduces the input byte-for-byte.
pub fn split_file_sections(diff: &str) -> Vec<&str> {
    if diff.is_empty() {
        return Vec::new();
    }

    let mut starts = Vec::new();
    if diff.starts_with(FILE_BOUNDARY) {
        starts.push(0);
    }
    let mut search_from = 0;
    while let Some(pos) = diff[search_from..].find('\n') {
        let line_start = search_from + pos + 1;
        if diff[line_start..].starts_with(FILE_BOUNDARY) {
            starts.push(line_start);
        }
        search_from = line_start;
        if search_from >= diff.len() {
            break;
        }
    }

    if starts.is_empty() {
        return vec![diff];
    }

    let mut sections = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        sections.push(&diff[..starts[0]]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        sections.push(&diff[start..end]);
    }
    sections
}

/// Extract the post-image filename from a section's `diff --git a/... b/...`
/// header. Returns `None` for sections that do not start at a file boundary.
pub fn section_filename(section: &str) -> Option<&str> {
    if !section.starts_with(FILE_BOUNDARY) {
        return None;
    }
    let header = section.lines().next()?;
    let b_path = header.rsplit(" b/").next()?;
    if b_path == header {
        return None;
    }
    Some(b_path.trim_end())
}

/// Greedily pack file sections into chunks of at most `max_chunk_bytes`.
///
/// A chunk never straddles a file boundary; a single file larger than the
/// budget forms its own oversized chunk. Concatenating the chunks reproduces
/// the input diff exactly.
pub fn chunk_diff(diff: &str, max_chunk_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for section in split_file_sections(diff) {
        if !current.is_empty() && current.len() + section.len() > max_chunk_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(section);
        if current.len() > max_chunk_bytes {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn has_allowed_extension(filename: &str, extensions: &[String]) -> bool {
    let lower = filename.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}

/// Keep only file sections whose filename carries one of the allowed
/// extensions (case-insensitive). Preamble sections are dropped.
pub fn filter_by_extension(diff: &str, extensions: &[String]) -> String {
    let mut kept = String::new();
    for section in split_file_sections(diff) {
        if let Some(filename) = section_filename(section) {
            if has_allowed_extension(filename, extensions) {
                kept.push_str(section);
            }
        }
    }
    kept
}

/// Outcome of applying the size policy to a fetched diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffDecision {
    /// Review this text (original or filtered).
    Proceed(String),
    /// Filtering removed every file; nothing reviewable remains.
    NoSupportedFiles,
    /// Even after filtering the diff exceeds the hard ceiling.
    TooLarge,
}

/// Size-adaptive review policy: small diffs pass through untouched, large
/// diffs are reduced to supported file types, and oversized remainders are
/// skipped.
#[derive(Debug, Clone)]
pub struct SizePolicy {
    pub max_diff_bytes: usize,
    pub large_multiplier: f64,
    pub extensions: Vec<String>,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            max_diff_bytes: DEFAULT_MAX_DIFF_BYTES,
            large_multiplier: LARGE_DIFF_MULTIPLIER,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SizePolicy {
    pub fn new(max_diff_bytes: usize, extensions: Vec<String>) -> Self {
        Self {
            max_diff_bytes,
            large_multiplier: LARGE_DIFF_MULTIPLIER,
            extensions,
        }
    }

    /// Hard ceiling above which a filtered diff is not reviewed.
    fn ceiling(&self) -> usize {
        (self.max_diff_bytes as f64 * self.large_multiplier) as usize
    }

    pub fn evaluate(&self, diff: &str) -> DiffDecision {
        if diff.len() <= self.max_diff_bytes {
            return DiffDecision::Proceed(diff.to_string());
        }

        let filtered = filter_by_extension(diff, &self.extensions);
        if filtered.is_empty() {
            return DiffDecision::NoSupportedFiles;
        }
        if filtered.len() > self.ceiling() {
            return DiffDecision::TooLarge;
        }
        DiffDecision::Proceed(filtered)
    }
}

/// Per-file range of line numbers visible on the right (post-image) side,
/// derived from hunk headers. Used to clamp model-reported line numbers onto
/// lines GitHub will accept for inline comments.
pub fn right_side_ranges(diff: &str) -> HashMap<String, (u64, u64)> {
    let mut ranges: HashMap<String, (u64, u64)> = HashMap::new();
    let mut current_file: Option<String> = None;

    for line in diff.lines() {
        if line.starts_with(FILE_BOUNDARY) {
            current_file = section_filename(line).map(|s| s.to_string());
            continue;
        }
        if let Some(file) = &current_file {
            if let Some(rest) = line.strip_prefix("@@ ") {
                if let Some((start, count)) = parse_right_hunk(rest) {
                    if count == 0 {
                        continue;
                    }
                    let end = start + count - 1;
                    ranges
                        .entry(file.clone())
                        .and_modify(|(lo, hi)| {
                            *lo = (*lo).min(start);
                            *hi = (*hi).max(end);
                        })
                        .or_insert((start, end));
                }
            }
        }
    }
    ranges
}

/// Parse the `+start[,count]` part out of a hunk header body like
/// `-12,4 +15,6 @@ fn foo()`. A missing count means 1.
fn parse_right_hunk(header: &str) -> Option<(u64, u64)> {
    let plus = header.split_whitespace().find(|tok| tok.starts_with('+'))?;
    let spec = &plus[1..];
    let (start, count) = match spec.split_once(',') {
        Some((s, c)) => (s.parse().ok()?, c.parse().ok()?),
        None => (spec.parse().ok()?, 1),
    };
    Some((start, count))
}

/// Clamp a reported line onto the visible right-side range for `path`.
/// Unknown paths pass through unchanged (the range is only advisory).
pub fn clamp_line(ranges: &HashMap<String, (u64, u64)>, path: &str, line: u64) -> u64 {
    let line = line.max(1);
    match ranges.get(path) {
        Some(&(lo, hi)) => line.clamp(lo, hi),
        None => line,
    }
}
