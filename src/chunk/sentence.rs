//! Sentence-accumulating chunking.

use crate::models::{ChunkMetadata, TextChunk};

use super::{split_sentences, ChunkOptions, Span};

/// Accumulate sentences until adding the next would exceed `chunk_size`,
/// then emit and restart with an overlap tail of whole sentences taken
/// backward from the closed chunk.
pub fn chunk_sentence(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    chunk_sentence_with(text, options, |_| ChunkMetadata::Sentence)
}

/// Same walk, with the metadata chosen by the caller. Used by the
/// paragraph strategy to tag sub-chunks with their paragraph index.
pub(crate) fn chunk_sentence_with(
    text: &str,
    options: &ChunkOptions,
    metadata: impl Fn(usize) -> ChunkMetadata,
) -> Vec<TextChunk> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Vec<Span> = Vec::new();
    let mut current_len = 0usize;

    for &sentence in &sentences {
        let add = sentence.len();
        if !current.is_empty() && current_len + add > options.chunk_size {
            emit(text, &mut chunks, &current, &metadata);
            let tail = overlap_tail(&current, options.chunk_overlap);
            current_len = tail.iter().map(Span::len).sum();
            current = tail;
        }
        current.push(sentence);
        current_len += add;
    }
    if !current.is_empty() {
        // Skip if the trailing buffer is only the overlap tail re-emitted.
        let end = current.last().expect("non-empty").end;
        if chunks.last().map(|c| end > c.end).unwrap_or(true) {
            emit(text, &mut chunks, &current, &metadata);
        }
    }

    super::merge_small_tail(&mut chunks, text, options.min_chunk_size);
    chunks
}

fn emit(
    text: &str,
    chunks: &mut Vec<TextChunk>,
    spans: &[Span],
    metadata: &impl Fn(usize) -> ChunkMetadata,
) {
    let start = spans[0].start;
    let end = spans.last().expect("non-empty").end;
    let content = text[start..end].trim();
    if content.is_empty() {
        return;
    }
    let index = chunks.len();
    // Offsets track the trimmed content.
    let lead = text[start..end].len() - text[start..end].trim_start().len();
    chunks.push(TextChunk::new(
        content.to_string(),
        index,
        start + lead,
        start + lead + content.len(),
        metadata(index),
    ));
}

/// Walk backward from the end of a closed chunk, collecting whole
/// sentences until the overlap budget is met.
fn overlap_tail(spans: &[Span], overlap_budget: usize) -> Vec<Span> {
    if overlap_budget == 0 {
        return Vec::new();
    }
    let mut tail: Vec<Span> = Vec::new();
    let mut size = 0usize;
    for &span in spans.iter().rev() {
        if size + span.len() > overlap_budget && !tail.is_empty() {
            break;
        }
        size += span.len();
        tail.push(span);
        if size >= overlap_budget {
            break;
        }
    }
    tail.reverse();
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {} talks about something. ", i))
            .collect()
    }

    #[test]
    fn accumulates_until_size_then_emits() {
        let text = sentences(20);
        let options = ChunkOptions {
            chunk_size: 200,
            chunk_overlap: 50,
            min_chunk_size: 40,
            ..ChunkOptions::default()
        };
        let chunks = chunk_sentence(&text, &options);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 200 + 60, "chunk too large: {}", c.content.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap_by_whole_sentences() {
        let text = sentences(12);
        let options = ChunkOptions {
            chunk_size: 180,
            chunk_overlap: 60,
            min_chunk_size: 30,
            ..ChunkOptions::default()
        };
        let chunks = chunk_sentence(&text, &options);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "no overlap between chunks");
            assert!(pair[1].start >= pair[0].start);
        }
    }

    #[test]
    fn single_sentence_text_is_one_chunk() {
        let chunks = chunk_sentence(
            "Just the one sentence here.",
            &ChunkOptions {
                min_chunk_size: 5,
                ..ChunkOptions::default()
            },
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Just the one sentence here.");
    }

    #[test]
    fn zero_overlap_produces_disjoint_chunks() {
        let text = sentences(10);
        let options = ChunkOptions {
            chunk_size: 150,
            chunk_overlap: 0,
            min_chunk_size: 20,
            ..ChunkOptions::default()
        };
        let chunks = chunk_sentence(&text, &options);
        for pair in chunks.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
    }
}
