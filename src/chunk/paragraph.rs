//! Paragraph-accumulating chunking.

use crate::models::{ChunkMetadata, TextChunk};

use super::sentence::chunk_sentence_with;
use super::{split_paragraphs, ChunkOptions, Span};

/// Accumulate paragraphs (split on blank lines) until adding the next
/// would exceed `chunk_size`. A paragraph that alone exceeds `chunk_size`
/// is recursively split by the sentence strategy; its sub-chunks are all
/// tagged with the owning paragraph index.
pub fn chunk_paragraph(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Vec<Span> = Vec::new();
    let mut current_first_para = 0usize;
    let mut current_len = 0usize;

    for (para_index, &para) in paragraphs.iter().enumerate() {
        // +2 accounts for the blank-line separator inside a merged chunk.
        let add = if current.is_empty() {
            para.len()
        } else {
            para.len() + 2
        };

        if !current.is_empty() && current_len + add > options.chunk_size {
            emit(text, &mut chunks, &current, current_first_para);
            current.clear();
            current_len = 0;
        }

        if para.len() > options.chunk_size {
            if !current.is_empty() {
                emit(text, &mut chunks, &current, current_first_para);
                current.clear();
                current_len = 0;
            }
            // Oversized paragraph: degrade to sentence-level sub-chunks.
            let para_text = &text[para.start..para.end];
            for sub in chunk_sentence_with(para_text, options, |_| ChunkMetadata::Paragraph {
                paragraph_index: para_index,
            }) {
                chunks.push(TextChunk::new(
                    sub.content,
                    chunks.len(),
                    para.start + sub.start,
                    para.start + sub.end,
                    sub.metadata,
                ));
            }
            continue;
        }

        if current.is_empty() {
            current_first_para = para_index;
        }
        current.push(para);
        current_len += add;
    }
    if !current.is_empty() {
        emit(text, &mut chunks, &current, current_first_para);
    }

    super::merge_small_tail(&mut chunks, text, options.min_chunk_size);
    chunks
}

fn emit(text: &str, chunks: &mut Vec<TextChunk>, spans: &[Span], first_para: usize) {
    let start = spans[0].start;
    let end = spans.last().expect("non-empty").end;
    let content = text[start..end].to_string();
    if content.trim().is_empty() {
        return;
    }
    let index = chunks.len();
    chunks.push(TextChunk::new(
        content,
        index,
        start,
        end,
        ChunkMetadata::Paragraph {
            paragraph_index: first_para,
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_small_paragraphs_into_one_chunk() {
        let text = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph.";
        let chunks = chunk_paragraph(
            text,
            &ChunkOptions {
                chunk_size: 500,
                min_chunk_size: 10,
                ..ChunkOptions::default()
            },
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("Alpha"));
        assert!(chunks[0].content.contains("Gamma"));
    }

    /// A paragraph larger than chunk_size degrades to
    /// sentence-level sub-chunks, all tagged with the same paragraph index.
    #[test]
    fn oversized_paragraph_degrades_to_sentences() {
        let big: String = (0..12)
            .map(|i| format!("Long sentence number {} fills space. ", i))
            .collect();
        let text = format!("Small intro paragraph.\n\n{}\n\nSmall outro paragraph.", big.trim());
        let options = ChunkOptions {
            chunk_size: 150,
            chunk_overlap: 0,
            min_chunk_size: 20,
            ..ChunkOptions::default()
        };
        let chunks = chunk_paragraph(&text, &options);
        let tagged: Vec<_> = chunks
            .iter()
            .filter(|c| {
                matches!(
                    c.metadata,
                    ChunkMetadata::Paragraph { paragraph_index: 1 }
                ) && c.content.contains("Long sentence")
            })
            .collect();
        assert!(tagged.len() > 1, "expected multiple sub-chunks of paragraph 1");
    }

    #[test]
    fn chunk_boundaries_respect_paragraphs() {
        let text = "One paragraph with enough words to count.\n\nTwo paragraph follows along here.\n\nThree closes the set of blocks.";
        let chunks = chunk_paragraph(
            text,
            &ChunkOptions {
                chunk_size: 60,
                min_chunk_size: 10,
                ..ChunkOptions::default()
            },
        );
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.content.starts_with('\n'));
        }
    }
}
