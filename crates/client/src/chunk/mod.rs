//! Token-aware text chunking.
//!
//! ### Strategies
//! - `Fixed`: sliding token window with `chunk_overlap`
//! - `Semantic`: packs whole paragraphs up to the target size
//! - `Hierarchical`: splits at Markdown headings, then packs each section
//! - `Adaptive`: picks a target from the document shape, then hierarchical
//!
//! Every chunk keeps its byte offsets, so `text == source[start..end]` holds
//! even where overlapping chunks share bytes. With `preserve_code_blocks`, a
//! cut that would land inside a fenced block moves past the fence close when
//! the chunk stays within `max_chunk_size`; fences longer than that are split.

pub mod blocks;
pub mod tokens;

use std::ops::Range;

use serde::{Deserialize, Serialize};
use sieve_core::config::{ChunkStrategy, ChunkerSettings};

pub use blocks::{DocumentProfile, Heading};
pub use tokens::{Token, count_tokens, tokenize};

use blocks::Layout;

/// Fenced-code share above which the adaptive strategy uses `code_chunk_size`.
const CODE_RATIO: f64 = 0.3;

/// Mean sentence length (tokens) above which prose counts as dense.
const DENSE_SENTENCE_TOKENS: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Position in the document's chunk sequence.
    pub index: usize,
    pub strategy: ChunkStrategy,
    /// Nearest Markdown heading at or before the chunk start.
    pub heading: Option<String>,
    pub has_code: bool,
    /// Location the text came from.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub token_count: usize,
    /// Byte offset of the first token in the source text.
    pub start_offset: usize,
    /// Byte offset just past the last token.
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    target: usize,
    min: usize,
    max: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    settings: ChunkerSettings,
}

impl Chunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ChunkerSettings {
        &self.settings
    }

    /// Chunk with the configured strategy.
    pub fn chunk(&self, text: &str, source: Option<&str>) -> Vec<Chunk> {
        self.chunk_with(text, self.settings.strategy, source)
    }

    pub fn chunk_with(&self, text: &str, strategy: ChunkStrategy, source: Option<&str>) -> Vec<Chunk> {
        let layout = Layout::analyze(text);
        if layout.len() == 0 {
            return Vec::new();
        }

        let mut ranges = match strategy {
            ChunkStrategy::Fixed => self.fixed(&layout, self.bounds(self.settings.chunk_size)),
            ChunkStrategy::Semantic => {
                let bounds = self.bounds(self.settings.chunk_size);
                self.pack(&layout, 0..layout.len(), bounds)
            }
            ChunkStrategy::Hierarchical => self.hierarchical(&layout, self.bounds(self.settings.chunk_size)),
            ChunkStrategy::Adaptive => {
                let target = self.target_for(layout.profile());
                self.hierarchical(&layout, self.bounds(target))
            }
        };

        let headings: Vec<Option<String>> =
            ranges.iter().map(|r| layout.heading_at(r.start).map(|h| h.text.clone())).collect();

        if strategy != ChunkStrategy::Fixed && self.settings.overlap_non_fixed {
            self.overlap(&layout, &mut ranges);
        }

        let chunks: Vec<Chunk> = ranges
            .into_iter()
            .zip(headings)
            .enumerate()
            .map(|(index, (range, heading))| {
                let (start, end) = layout.span(&range);
                Chunk {
                    text: text[start..end].to_string(),
                    token_count: range.len(),
                    start_offset: start,
                    end_offset: end,
                    metadata: ChunkMetadata {
                        index,
                        strategy,
                        heading,
                        has_code: layout.has_code(&range),
                        source: source.map(str::to_string),
                    },
                }
            })
            .collect();

        tracing::debug!(strategy = strategy.as_str(), tokens = layout.len(), chunks = chunks.len(), "chunked");
        chunks
    }

    /// Target size the adaptive strategy would use for `text`.
    pub fn adaptive_target(&self, text: &str) -> usize {
        self.target_for(Layout::analyze(text).profile())
    }

    fn target_for(&self, profile: DocumentProfile) -> usize {
        if !self.settings.adaptive_enabled {
            return self.settings.chunk_size;
        }
        if profile.code_ratio >= CODE_RATIO {
            self.settings.code_chunk_size
        } else if profile.avg_sentence_tokens >= DENSE_SENTENCE_TOKENS {
            self.settings.dense_chunk_size
        } else {
            self.settings.chunk_size
        }
    }

    fn bounds(&self, target: usize) -> Bounds {
        let max = self.settings.max_chunk_size.max(1);
        let target = target.clamp(1, max);
        Bounds { target, min: self.settings.min_chunk_size.min(target), max }
    }

    fn fixed(&self, layout: &Layout, bounds: Bounds) -> Vec<Range<usize>> {
        let n = layout.len();
        let overlap = self.settings.chunk_overlap.min(bounds.target - 1);

        let mut out = Vec::new();
        let mut a = 0;
        while a < n {
            let b = self.fence_safe_end(layout, a, (a + bounds.target).min(n), bounds);
            out.push(a..b);
            if b >= n {
                break;
            }
            let mut next = b.saturating_sub(overlap).max(a + 1);
            if self.settings.preserve_code_blocks && layout.fence_containing(next).is_some() {
                next = b;
            }
            a = next;
        }
        out
    }

    /// Greedy packing of `range` at paragraph, heading and fence boundaries.
    fn pack(&self, layout: &Layout, range: Range<usize>, bounds: Bounds) -> Vec<Range<usize>> {
        let Bounds { target, min, max } = bounds;
        let end = range.end;

        let mut out = Vec::new();
        let mut a = range.start;
        while a < end {
            if end - a <= target {
                out.push(a..end);
                break;
            }

            let limit = a + target;
            let b = match layout.last_break_in(a + 1, limit).filter(|&p| p - a >= min) {
                Some(p) => p,
                None => {
                    // Nothing usable before the target: stretch to the next
                    // boundary if that still fits, otherwise cut mid-block.
                    let next = layout.first_break_after(limit).unwrap_or(end).min(end);
                    if next - a <= max { next } else { self.fence_safe_end(layout, a, limit, bounds) }
                }
            };
            // A remainder too small to stand alone is absorbed, or given
            // `min` tokens from this chunk when absorbing would pass `max`.
            let b = match end - b {
                rest if rest == 0 || rest >= min => b,
                _ if end - a <= max => end,
                _ => b.min(end - min),
            };

            out.push(a..b);
            a = b;
        }
        out
    }

    /// Sections below `min` (a bare title, say) lead into the next section,
    /// so a heading always opens the chunk holding its content. Oversized
    /// merges are split again by `pack`.
    fn hierarchical(&self, layout: &Layout, bounds: Bounds) -> Vec<Range<usize>> {
        let mut sections: Vec<Range<usize>> = Vec::new();
        for section in layout.sections() {
            match sections.last_mut() {
                Some(current) if current.len() < bounds.min => current.end = section.end,
                _ => sections.push(section),
            }
        }
        // A short trailing section joins the one before it.
        if sections.len() > 1
            && let Some(last) = sections.last().cloned()
            && last.len() < bounds.min
        {
            sections.pop();
            if let Some(before) = sections.last_mut() {
                before.end = last.end;
            }
        }

        sections.into_iter().flat_map(|s| self.pack(layout, s, bounds)).collect()
    }

    /// Move a cut out of a code fence.
    fn fence_safe_end(&self, layout: &Layout, a: usize, b: usize, bounds: Bounds) -> usize {
        if !self.settings.preserve_code_blocks {
            return b;
        }
        let Some(fence) = layout.fence_containing(b) else {
            return b;
        };

        if fence.end - a <= bounds.max {
            fence.end
        } else if fence.start > a && fence.start - a >= bounds.min {
            fence.start
        } else {
            (a + bounds.max).min(fence.end)
        }
    }

    /// Repeat the tail of each chunk at the head of the next.
    fn overlap(&self, layout: &Layout, ranges: &mut [Range<usize>]) {
        let overlap = self.settings.chunk_overlap;
        let max = self.settings.max_chunk_size.max(1);
        for i in 1..ranges.len() {
            let prev_start = ranges[i - 1].start;
            let current = ranges[i].clone();
            let start = current
                .start
                .saturating_sub(overlap)
                .max(prev_start + 1)
                .max(current.end.saturating_sub(max));
            if start >= current.start {
                continue;
            }
            if self.settings.preserve_code_blocks && layout.fence_containing(start).is_some() {
                continue;
            }
            ranges[i].start = start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(chunk_size: usize, overlap: usize, min: usize, max: usize) -> ChunkerSettings {
        ChunkerSettings {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
            max_chunk_size: max,
            ..ChunkerSettings::default()
        }
    }

    fn words(prefix: &str, count: usize) -> String {
        (0..count).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join(" ")
    }

    fn fenced(count: usize) -> String {
        format!("```rust\n{}\n```", words("c", count - 2))
    }

    fn assert_well_formed(text: &str, chunks: &[Chunk], max: usize) {
        assert!(!chunks.is_empty());
        let mut last_start = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.token_count > 0);
            assert!(chunk.token_count <= max, "chunk {i} has {} tokens", chunk.token_count);
            assert!(chunk.start_offset >= last_start);
            assert_eq!(chunk.text, &text[chunk.start_offset..chunk.end_offset]);
            assert_eq!(chunk.token_count, count_tokens(&chunk.text));
            assert_eq!(chunk.metadata.index, i);
            last_start = chunk.start_offset;
        }
    }

    fn mixed_document() -> String {
        let mut doc = String::from("# Overview\n\n");
        doc.push_str(&words("intro", 45));
        doc.push_str("\n\n## Install\n\n");
        doc.push_str(&fenced(30));
        doc.push_str("\n\n");
        doc.push_str(&words("after", 12));
        doc.push_str("\n\n## Details\n\n");
        for p in 0..5 {
            doc.push_str(&words(&format!("p{p}w"), 18));
            doc.push_str("\n\n");
        }
        doc.push_str(&fenced(150));
        doc.push_str("\n\n### Tail\n\nshort end.");
        doc
    }

    #[test]
    fn test_fixed_window_count() {
        let text = words("w", 10_000);
        let chunker = Chunker::new(settings(512, 50, 64, 1024));
        let chunks = chunker.chunk_with(&text, ChunkStrategy::Fixed, None);

        assert_eq!(chunks.len(), 22);
        assert_well_formed(&text, &chunks, 512);
        assert!(chunks[..21].iter().all(|c| c.token_count == 512));
        // Consecutive windows share exactly the overlap.
        assert_eq!(chunks[1].text.split_whitespace().next(), Some("w462"));
    }

    #[test]
    fn test_all_strategies_respect_bounds() {
        let text = mixed_document();
        let mut s = settings(40, 5, 10, 80);
        for overlap_non_fixed in [false, true] {
            s.overlap_non_fixed = overlap_non_fixed;
            let chunker = Chunker::new(s.clone());
            for strategy in [
                ChunkStrategy::Fixed,
                ChunkStrategy::Semantic,
                ChunkStrategy::Hierarchical,
                ChunkStrategy::Adaptive,
            ] {
                let chunks = chunker.chunk_with(&text, strategy, Some("doc.md"));
                assert_well_formed(&text, &chunks, 80);
                assert!(chunks.iter().all(|c| c.metadata.strategy == strategy));
                assert!(chunks.iter().all(|c| c.metadata.source.as_deref() == Some("doc.md")));
            }
        }
    }

    #[test]
    fn test_fence_is_not_split() {
        let text = format!("{}\n\n{}\n\n{}", words("a", 30), fenced(20), words("b", 30));
        let chunks = Chunker::new(settings(40, 0, 5, 60)).chunk_with(&text, ChunkStrategy::Fixed, None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 50);
        assert!(chunks[0].text.ends_with("```"));
        assert!(chunks[0].metadata.has_code);
        assert!(!chunks[1].metadata.has_code);
    }

    #[test]
    fn test_fence_split_when_preservation_off() {
        let text = format!("{}\n\n{}\n\n{}", words("a", 30), fenced(20), words("b", 30));
        let mut s = settings(40, 0, 5, 60);
        s.preserve_code_blocks = false;
        let chunks = Chunker::new(s).chunk_with(&text, ChunkStrategy::Fixed, None);
        assert_eq!(chunks[0].token_count, 40);
    }

    #[test]
    fn test_oversized_fence_split_at_max() {
        let text = format!("{}\n\n{}", words("a", 10), fenced(100));
        let chunks = Chunker::new(settings(40, 0, 5, 60)).chunk_with(&text, ChunkStrategy::Fixed, None);

        let counts: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, [10, 60, 40]);
        assert!(chunks[1].text.starts_with("```rust"));
    }

    #[test]
    fn test_semantic_packs_paragraphs() {
        let text = (0..6).map(|p| words(&format!("p{p}w"), 10)).collect::<Vec<_>>().join("\n\n");
        let chunks = Chunker::new(settings(25, 0, 5, 40)).chunk_with(&text, ChunkStrategy::Semantic, None);

        let counts: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, [20, 20, 20]);
        assert!(chunks[1].text.starts_with("p2w0"));
        assert!(chunks[1].text.ends_with("p3w9"));
    }

    #[test]
    fn test_hierarchical_sections_and_headings() {
        let text = format!("# A\n\n{}\n\n# B\n\n{}\n\n## C\n\n{}", words("a", 30), words("b", 30), words("c", 3));
        let chunks = Chunker::new(settings(40, 0, 10, 80)).chunk_with(&text, ChunkStrategy::Hierarchical, None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.heading.as_deref(), Some("A"));
        assert_eq!(chunks[1].metadata.heading.as_deref(), Some("B"));
        assert!(chunks[1].text.starts_with("# B"));
        assert!(chunks[1].text.contains("## C"));
    }

    #[test]
    fn test_heading_stays_with_content() {
        let text = format!("# Big\n\n{}", words("w", 100));
        let chunks = Chunker::new(settings(40, 0, 10, 80)).chunk_with(&text, ChunkStrategy::Hierarchical, None);

        assert!(chunks[0].text.starts_with("# Big\n\nw0"));
        assert_eq!(chunks[0].token_count, 40);
        assert_well_formed(&text, &chunks, 80);
    }

    fn assert_min_except_last(chunks: &[Chunk], min: usize) {
        let (_, rest) = chunks.split_last().unwrap();
        for chunk in rest {
            assert!(chunk.token_count >= min, "chunk {} has {} tokens", chunk.metadata.index, chunk.token_count);
        }
    }

    #[test]
    fn test_title_only_section_leads_into_content() {
        let text = format!("# Guide\n\n## Intro\n\n{}", words("w", 200));
        let chunker = Chunker::new(settings(40, 0, 10, 80));
        for strategy in [ChunkStrategy::Hierarchical, ChunkStrategy::Adaptive] {
            let chunks = chunker.chunk_with(&text, strategy, None);
            assert_well_formed(&text, &chunks, 80);
            assert_min_except_last(&chunks, 10);
            assert!(chunks[0].text.starts_with("# Guide\n\n## Intro\n\nw0"));
        }
    }

    #[test]
    fn test_sectioned_strategies_keep_minimum_size() {
        let text = mixed_document();
        let chunker = Chunker::new(settings(40, 5, 10, 80));
        for strategy in [ChunkStrategy::Hierarchical, ChunkStrategy::Adaptive] {
            let chunks = chunker.chunk_with(&text, strategy, None);
            assert_min_except_last(&chunks, 10);
        }
    }

    #[test]
    fn test_small_remainder_borrows_from_oversized_run() {
        // 85 tokens with no usable boundary: the cut leaves the tail `min` tokens.
        let text = words("w", 85);
        let chunks = Chunker::new(settings(80, 0, 10, 80)).chunk_with(&text, ChunkStrategy::Semantic, None);
        let counts: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, [75, 10]);
    }

    #[test]
    fn test_outer_fence_survives_inner_fence() {
        let body = format!("{}\n```\n{}\n```\n{}", words("a", 16), words("b", 20), words("c", 14));
        let fenced = crate::extract::fence_code(&body, Some("md"));
        let text = format!("{}\n\n{}\n\n{}", words("lead", 10), fenced, words("tail", 40));

        let chunks = Chunker::new(settings(30, 0, 5, 100)).chunk_with(&text, ChunkStrategy::Fixed, None);
        assert_eq!(chunks[0].token_count, 64);
        assert!(chunks[0].text.ends_with(&fenced));
        assert!(chunks[1..].iter().all(|c| !c.metadata.has_code));
    }

    #[test]
    fn test_overlap_for_non_fixed_when_enabled() {
        let text = (0..6).map(|p| words(&format!("p{p}w"), 10)).collect::<Vec<_>>().join("\n\n");
        let mut s = settings(25, 5, 5, 40);
        s.overlap_non_fixed = true;
        let chunks = Chunker::new(s).chunk_with(&text, ChunkStrategy::Semantic, None);

        assert!(chunks[1].start_offset < chunks[0].end_offset);
        let tail: Vec<&str> = chunks[0].text.split_whitespace().rev().take(5).collect();
        let head: Vec<&str> = chunks[1].text.split_whitespace().take(5).collect();
        assert_eq!(tail.into_iter().rev().collect::<Vec<_>>(), head);
    }

    #[test]
    fn test_adaptive_target_follows_document_shape() {
        let chunker = Chunker::new(ChunkerSettings::default());
        let s = chunker.settings().clone();

        let code_heavy = format!("Intro text.\n\n{}", fenced(60));
        assert_eq!(chunker.adaptive_target(&code_heavy), s.code_chunk_size);

        let dense = format!("{}.", words("long", 40));
        assert_eq!(chunker.adaptive_target(&dense), s.dense_chunk_size);

        let plain = "Short one. Another short one. And a third.";
        assert_eq!(chunker.adaptive_target(plain), s.chunk_size);

        let disabled = Chunker::new(ChunkerSettings { adaptive_enabled: false, ..ChunkerSettings::default() });
        assert_eq!(disabled.adaptive_target(&code_heavy), s.chunk_size);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        let chunker = Chunker::new(ChunkerSettings::default());
        assert!(chunker.chunk("  \n\n ", None).is_empty());
    }
}
