//! Fixed-width sliding-window chunking.

use crate::models::{ChunkMetadata, TextChunk};

use super::{ChunkOptions, Span};

/// Window searched around a raw boundary for the nearest sentence
/// terminator when `preserve_sentences` is set.
const SENTENCE_SNAP_WINDOW: usize = 200;

/// Slide a window of `chunk_size` with `chunk_overlap` retraction between
/// windows. Boundaries optionally snap to the nearest sentence terminator
/// within ±200 characters; windows never exceed `max_chunk_size`; a
/// below-minimum tail is merged into the previous chunk.
pub fn chunk_fixed(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let len = text.len();
    let mut spans: Vec<Span> = Vec::new();
    let mut start = 0usize;

    while start < len {
        let raw_end = (start + options.chunk_size).min(len);
        let mut end = raw_end;
        if options.preserve_sentences && raw_end < len {
            if let Some(snapped) = nearest_sentence_end(text, raw_end) {
                if snapped > start {
                    end = snapped;
                }
            }
        }
        end = end.min(start + options.max_chunk_size).min(len);
        end = floor_boundary(text, end);
        if end <= start {
            end = ceil_boundary(text, (start + options.chunk_size).min(len));
        }
        spans.push(Span { start, end });
        if end >= len {
            break;
        }
        let next = end.saturating_sub(options.chunk_overlap).max(start + 1);
        start = ceil_boundary(text, next);
    }

    let mut chunks: Vec<TextChunk> = spans
        .into_iter()
        .filter(|s| !text[s.start..s.end].trim().is_empty())
        .enumerate()
        .map(|(i, s)| {
            TextChunk::new(
                text[s.start..s.end].to_string(),
                i,
                s.start,
                s.end,
                ChunkMetadata::Fixed,
            )
        })
        .collect();

    super::merge_small_tail(&mut chunks, text, options.min_chunk_size);
    chunks
}

/// Nearest sentence terminator (followed by whitespace) within the snap
/// window around `pos`. Returns the offset just past the terminator.
fn nearest_sentence_end(text: &str, pos: usize) -> Option<usize> {
    let lo = floor_boundary(text, pos.saturating_sub(SENTENCE_SNAP_WINDOW));
    let hi = floor_boundary(text, (pos + SENTENCE_SNAP_WINDOW).min(text.len()));
    let mut best: Option<usize> = None;
    let mut best_dist = usize::MAX;
    for (i, c) in text[lo..hi].char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let after = lo + i + c.len_utf8();
            let next_ok = match text[after..].chars().next() {
                None => true,
                Some(n) => n.is_whitespace(),
            };
            if next_ok {
                let dist = after.abs_diff(pos);
                if dist < best_dist {
                    best_dist = dist;
                    best = Some(after);
                }
            }
        }
    }
    best
}

fn floor_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}
