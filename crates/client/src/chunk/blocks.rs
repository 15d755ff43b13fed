//! Document structure in token coordinates: code fences, paragraph and
//! heading boundaries, and the shape profile the adaptive strategy reads.

use std::collections::BTreeSet;
use std::ops::Range;

use super::tokens::{Token, tokenize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Index of the heading's first token.
    pub token: usize,
    pub level: u8,
    pub text: String,
}

/// Coarse shape of a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentProfile {
    /// Share of tokens inside fenced code blocks.
    pub code_ratio: f64,
    /// Mean prose tokens per sentence, fences excluded.
    pub avg_sentence_tokens: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    tokens: Vec<Token>,
    /// Token ranges of fenced blocks, markers included. An unclosed fence
    /// runs to the end of the document.
    fences: Vec<Range<usize>>,
    /// Token indices where a paragraph, heading or fence starts or a fence
    /// ends. Sorted, never inside a fence, never 0 or `len`.
    breaks: Vec<usize>,
    headings: Vec<Heading>,
    profile: DocumentProfile,
}

impl Layout {
    pub fn analyze(text: &str) -> Self {
        let tokens = tokenize(text);
        let n = tokens.len();
        let token_at = |byte: usize| tokens.partition_point(|t| t.start < byte);

        let mut fences = Vec::new();
        let mut breaks = BTreeSet::new();
        let mut headings = Vec::new();
        let mut open: Option<(usize, Fence)> = None;
        let mut prev_blank = false;
        let mut offset = 0;

        for raw in text.split_inclusive('\n') {
            let line_start = offset;
            offset += raw.len();
            let trimmed = raw.trim();
            let marker = Fence::parse(trimmed);

            if let Some((fence_start, opening)) = open {
                if marker.is_some_and(|m| opening.closed_by(m, trimmed)) {
                    let fence_end = token_at(offset);
                    fences.push(fence_start..fence_end);
                    breaks.insert(fence_end);
                    open = None;
                }
                prev_blank = false;
                continue;
            }

            if let Some(m) = marker {
                let fence_start = token_at(line_start);
                breaks.insert(fence_start);
                open = Some((fence_start, m));
                prev_blank = false;
                continue;
            }

            if trimmed.is_empty() {
                prev_blank = true;
                continue;
            }

            let first = token_at(line_start);
            if prev_blank {
                breaks.insert(first);
            }
            if let Some((level, title)) = parse_heading(trimmed) {
                breaks.insert(first);
                headings.push(Heading { token: first, level, text: title });
            }
            prev_blank = false;
        }
        if let Some((fence_start, _)) = open {
            fences.push(fence_start..n);
        }

        let breaks = breaks.into_iter().filter(|&b| b > 0 && b < n).collect();
        let profile = profile(text, &tokens, &fences);
        Self { tokens, fences, breaks, headings, profile }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn profile(&self) -> DocumentProfile {
        self.profile
    }

    /// Byte span of a token range.
    pub fn span(&self, range: &Range<usize>) -> (usize, usize) {
        (self.tokens[range.start].start, self.tokens[range.end - 1].end)
    }

    /// The fence that a cut before token `at` would split.
    pub fn fence_containing(&self, at: usize) -> Option<&Range<usize>> {
        self.fences.iter().find(|f| f.start < at && at < f.end)
    }

    pub fn has_code(&self, range: &Range<usize>) -> bool {
        self.fences.iter().any(|f| f.start < range.end && range.start < f.end)
    }

    /// Largest boundary in `lo..=hi`.
    pub fn last_break_in(&self, lo: usize, hi: usize) -> Option<usize> {
        let idx = self.breaks.partition_point(|&b| b <= hi);
        idx.checked_sub(1).map(|i| self.breaks[i]).filter(|&b| b >= lo)
    }

    /// Smallest boundary strictly after `at`.
    pub fn first_break_after(&self, at: usize) -> Option<usize> {
        let idx = self.breaks.partition_point(|&b| b <= at);
        self.breaks.get(idx).copied()
    }

    /// Nearest heading at or before token `at`.
    pub fn heading_at(&self, at: usize) -> Option<&Heading> {
        let idx = self.headings.partition_point(|h| h.token <= at);
        idx.checked_sub(1).map(|i| &self.headings[i])
    }

    /// Token ranges split at every heading.
    pub fn sections(&self) -> Vec<Range<usize>> {
        let mut starts: Vec<usize> = vec![0];
        starts.extend(self.headings.iter().map(|h| h.token).filter(|&t| t > 0));
        starts.dedup();
        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| start..starts.get(i + 1).copied().unwrap_or(self.len()))
            .collect()
    }
}

/// Leading run of a fence line: three or more backticks or tildes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    pub(crate) fn parse(trimmed: &str) -> Option<Self> {
        let marker = trimmed.chars().next().filter(|&c| c == '`' || c == '~')?;
        let len = trimmed.chars().take_while(|&c| c == marker).count();
        (len >= 3).then_some(Self { marker, len })
    }

    /// A closing line is a bare run of the same marker, at least as long.
    pub(crate) fn closed_by(self, line: Fence, trimmed: &str) -> bool {
        line.marker == self.marker && line.len >= self.len && trimmed.len() == line.len
    }
}

/// ATX heading: one to six `#` followed by a space.
fn parse_heading(trimmed: &str) -> Option<(u8, String)> {
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    Some((level as u8, title.to_string()))
}

fn profile(text: &str, tokens: &[Token], fences: &[Range<usize>]) -> DocumentProfile {
    if tokens.is_empty() {
        return DocumentProfile { code_ratio: 0.0, avg_sentence_tokens: 0.0 };
    }

    let code: usize = fences.iter().map(|f| f.len()).sum();
    let mut prose = 0usize;
    let mut sentences = 0usize;
    // Fences are sorted and disjoint, so one cursor walks them alongside the tokens.
    let mut fences = fences.iter().peekable();
    for (i, token) in tokens.iter().enumerate() {
        while fences.next_if(|f| f.end <= i).is_some() {}
        if fences.peek().is_some_and(|f| f.contains(&i)) {
            continue;
        }
        prose += 1;
        if text[token.start..token.end].ends_with(['.', '!', '?']) {
            sentences += 1;
        }
    }

    DocumentProfile {
        code_ratio: code as f64 / tokens.len() as f64,
        avg_sentence_tokens: prose as f64 / sentences.max(1) as f64,
    }
}
