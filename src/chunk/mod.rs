//! Text chunking strategies.
//!
//! [`chunk`] splits normalized text into ordered [`TextChunk`]s under a
//! selectable strategy. All strategies guarantee source order, non-decreasing
//! character spans, and no chunk below `min_chunk_size` except a final chunk
//! that has no smaller neighbor to merge into.

mod fixed;
mod heading;
mod paragraph;
mod sentence;
mod topic;

pub use fixed::chunk_fixed;
pub use heading::chunk_heading;
pub use paragraph::chunk_paragraph;
pub use sentence::chunk_sentence;
pub use topic::chunk_topic;

use crate::config::ChunkingConfig;
use crate::models::TextChunk;

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Fixed,
    Sentence,
    Paragraph,
    /// Heading-based semantic chunking; falls back to paragraph chunking
    /// when the text has no heading-like lines.
    Heading,
    /// Topic-based chunking driven by keyword overlap between sentences.
    Topic,
}

impl ChunkStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(ChunkStrategy::Fixed),
            "sentence" => Some(ChunkStrategy::Sentence),
            "paragraph" => Some(ChunkStrategy::Paragraph),
            "heading" => Some(ChunkStrategy::Heading),
            "topic" => Some(ChunkStrategy::Topic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Fixed => "fixed",
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Heading => "heading",
            ChunkStrategy::Topic => "topic",
        }
    }
}

/// Bounds and knobs shared by every strategy.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Fixed strategy only: snap window boundaries to sentence terminators.
    pub preserve_sentences: bool,
    /// Topic strategy only: minimum keyword overlap to stay in one chunk.
    pub semantic_threshold: f32,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Paragraph,
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            max_chunk_size: 2000,
            preserve_sentences: true,
            semantic_threshold: 0.3,
        }
    }
}

impl ChunkOptions {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            strategy: ChunkStrategy::parse(&config.strategy).unwrap_or(ChunkStrategy::Paragraph),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            preserve_sentences: true,
            semantic_threshold: config.semantic_threshold,
        }
    }

    /// Named presets used by the CLI and tests.
    pub fn preset(name: &str) -> Option<Self> {
        let base = Self::default();
        match name {
            "default" => Some(base),
            "qa" => Some(Self {
                chunk_size: 800,
                chunk_overlap: 150,
                ..base
            }),
            "fine" => Some(Self {
                chunk_size: 400,
                chunk_overlap: 80,
                min_chunk_size: 50,
                max_chunk_size: 800,
                ..base
            }),
            _ => None,
        }
    }
}

/// Split text into ordered chunks under the selected strategy.
pub fn chunk(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let text = text.trim_end();
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut chunks = match options.strategy {
        ChunkStrategy::Fixed => chunk_fixed(text, options),
        ChunkStrategy::Sentence => chunk_sentence(text, options),
        ChunkStrategy::Paragraph => chunk_paragraph(text, options),
        ChunkStrategy::Heading => chunk_heading(text, options),
        ChunkStrategy::Topic => chunk_topic(text, options),
    };
    for (i, c) in chunks.iter_mut().enumerate() {
        c.index = i;
    }
    chunks
}

/// A span of source text, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Sentence boundaries: a terminator (`.` `!` `?`) followed by whitespace
/// or end of text, or a paragraph break. Offsets index the original text.
pub(crate) fn split_sentences(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let end = match c {
            '.' | '!' | '?' => {
                let after = i + c.len_utf8();
                match text[after..].chars().next() {
                    None => Some(after),
                    Some(next) if next.is_whitespace() => Some(after),
                    _ => None,
                }
            }
            '\n' if matches!(iter.peek(), Some((_, '\n'))) => Some(i),
            _ => None,
        };
        if let Some(end) = end {
            if text[start..end].trim().is_empty() {
                start = end;
                continue;
            }
            spans.push(Span { start, end });
            start = end;
        }
    }
    if start < text.len() && !text[start..].trim().is_empty() {
        spans.push(Span {
            start,
            end: text.len(),
        });
    }
    spans
}

/// Paragraph spans: blocks separated by blank lines.
pub(crate) fn split_paragraphs(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut offset = 0usize;
    for block in text.split("\n\n") {
        let trimmed = block.trim();
        if !trimmed.is_empty() {
            let lead = block.len() - block.trim_start().len();
            spans.push(Span {
                start: offset + lead,
                end: offset + lead + trimmed.len(),
            });
        }
        offset += block.len() + 2;
    }
    spans
}

/// Merge a below-minimum trailing chunk into its predecessor.
pub(crate) fn merge_small_tail(chunks: &mut Vec<TextChunk>, text: &str, min_size: usize) {
    if chunks.len() < 2 {
        return;
    }
    let last = chunks.last().expect("len checked");
    if last.content.len() >= min_size {
        return;
    }
    let last = chunks.pop().expect("len checked");
    let prev = chunks.last_mut().expect("len checked");
    let merged = TextChunk::new(
        text[prev.start..last.end].to_string(),
        prev.index,
        prev.start,
        last.end,
        prev.metadata.clone(),
    );
    *prev = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn spans_cover_text(chunks: &[TextChunk], text: &str) {
        assert!(!chunks.is_empty());
        let mut covered_to = 0usize;
        for (i, c) in chunks.iter().enumerate() {
            assert!(!c.content.trim().is_empty(), "chunk {} is empty", i);
            assert!(c.start <= c.end);
            if i > 0 {
                assert!(
                    c.start >= chunks[i - 1].start,
                    "chunk starts must be non-decreasing"
                );
                // Anything skipped between chunks must be pure whitespace
                // (paragraph separators, inter-sentence spacing).
                if c.start > covered_to {
                    assert!(
                        text[covered_to..c.start].trim().is_empty(),
                        "gap before chunk {}",
                        i
                    );
                }
            }
            covered_to = covered_to.max(c.end);
        }
        assert!(text[covered_to..].trim().is_empty(), "tail of text not covered");
    }

    /// Concatenating chunk spans in order reconstructs a superset of the
    /// text: overlaps allowed, gaps not.
    #[test]
    fn all_strategies_cover_source_text() {
        let text = "Rust is a systems language. It has no garbage collector.\n\n\
            Memory safety comes from ownership. Borrowing enforces aliasing rules.\n\n\
            The compiler checks lifetimes. Programs are fast and safe. \
            Tooling includes cargo and rustfmt. Documentation lives on docs.rs.";
        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::Sentence,
            ChunkStrategy::Paragraph,
            ChunkStrategy::Heading,
            ChunkStrategy::Topic,
        ] {
            let options = ChunkOptions {
                strategy,
                chunk_size: 120,
                chunk_overlap: 20,
                min_chunk_size: 20,
                max_chunk_size: 300,
                ..ChunkOptions::default()
            };
            let chunks = chunk(text, &options);
            spans_cover_text(&chunks, text);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("", &ChunkOptions::default()).is_empty());
        assert!(chunk("   \n\n  ", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn indices_are_contiguous() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} has some words in it.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk(
            &text,
            &ChunkOptions {
                chunk_size: 200,
                chunk_overlap: 40,
                min_chunk_size: 40,
                ..ChunkOptions::default()
            },
        );
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn sentence_splitting_keeps_offsets() {
        let text = "One. Two! Three? Four";
        let spans = split_sentences(text);
        assert_eq!(spans.len(), 4);
        assert_eq!(&text[spans[0].start..spans[0].end], "One.");
        assert_eq!(&text[spans[3].start..spans[3].end].trim_start(), &"Four");
    }

    #[test]
    fn paragraph_splitting_keeps_offsets() {
        let text = "First block here.\n\nSecond block.\n\n\nThird.";
        let spans = split_paragraphs(text);
        assert_eq!(spans.len(), 3);
        assert_eq!(&text[spans[1].start..spans[1].end], "Second block.");
    }

    #[test]
    fn preset_qa_matches_expected_bounds() {
        let qa = ChunkOptions::preset("qa").unwrap();
        assert_eq!(qa.chunk_size, 800);
        assert_eq!(qa.chunk_overlap, 150);
        assert!(ChunkOptions::preset("nope").is_none());
    }

    #[test]
    fn merge_small_tail_absorbs_fragment() {
        let text = "aaaa bbbb cccc dddd x";
        let mut chunks = vec![
            TextChunk::new(&text[0..19], 0, 0, 19, ChunkMetadata::Fixed),
            TextChunk::new(&text[20..21], 1, 20, 21, ChunkMetadata::Fixed),
        ];
        merge_small_tail(&mut chunks, text, 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 21);
    }
}
