//! Whitespace normalization and code fencing for extracted text.

use crate::chunk::blocks::Fence;

/// Normalize line endings and blank-line runs.
///
/// - CRLF and lone CR become LF
/// - trailing whitespace is stripped from every line
/// - three or more consecutive newlines collapse to a single blank line
/// - leading and trailing blank lines are dropped
///
/// Lines inside fenced code blocks keep their indentation and blank lines.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    let mut open: Option<Fence> = None;

    for line in unified.lines() {
        let line = line.trim_end();
        let trimmed = line.trim_start();
        match (open, Fence::parse(trimmed)) {
            (None, Some(fence)) => open = Some(fence),
            (Some(opening), Some(fence)) if opening.closed_by(fence, trimmed) => open = None,
            _ => {}
        }

        if line.is_empty() && open.is_none() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }

        out.push_str(line);
        out.push('\n');
    }

    out.trim_matches('\n').to_string()
}

/// Wrap source text in a fence tagged with `language`.
///
/// The fence is one backtick longer than the longest backtick run in the
/// text, so embedded fences cannot close it early.
pub fn fence_code(text: &str, language: Option<&str>) -> String {
    let longest = longest_backtick_run(text);
    let fence = "`".repeat(longest.max(2) + 1);
    let body = text.replace("\r\n", "\n");
    let body = body.trim_end_matches('\n');
    format!("{fence}{}\n{body}\n{fence}", language.unwrap_or_default())
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Count whitespace-delimited words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
