//! Heading-based (semantic) chunking.

use crate::models::{ChunkMetadata, TextChunk};

use super::paragraph::chunk_paragraph;
use super::ChunkOptions;

/// One chunk per section (heading to next heading). Headings are Markdown
/// ATX lines or short `Title:`-style lines. Text with no heading-like
/// lines falls back to paragraph chunking; oversized sections are split
/// recursively by the paragraph strategy and keep their section title.
pub fn chunk_heading(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let headings = find_headings(text);
    if headings.is_empty() {
        return chunk_paragraph(text, options);
    }

    let mut chunks: Vec<TextChunk> = Vec::new();

    // Preamble before the first heading.
    let first = &headings[0];
    if !text[..first.line_start].trim().is_empty() {
        push_section(text, &mut chunks, 0, first.line_start, "Introduction", options);
    }

    for (i, h) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|next| next.line_start)
            .unwrap_or(text.len());
        push_section(text, &mut chunks, h.body_start, body_end, &h.title, options);
    }

    chunks
}

struct HeadingLine {
    title: String,
    /// Offset of the heading line itself.
    line_start: usize,
    /// Offset just past the heading line.
    body_start: usize,
}

fn find_headings(text: &str) -> Vec<HeadingLine> {
    let atx = regex::Regex::new(r"^(#{1,6})\s+(.+)$").expect("static regex");
    let titled = regex::Regex::new(r"^([A-Z][A-Za-z0-9 ,'\-]{0,68}):\s*$").expect("static regex");

    let mut headings = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let title = if let Some(cap) = atx.captures(trimmed) {
            Some(cap[2].trim().to_string())
        } else {
            titled.captures(trimmed).map(|cap| cap[1].trim().to_string())
        };
        if let Some(title) = title {
            headings.push(HeadingLine {
                title,
                line_start: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    headings
}

fn push_section(
    text: &str,
    chunks: &mut Vec<TextChunk>,
    start: usize,
    end: usize,
    title: &str,
    options: &ChunkOptions,
) {
    let body = &text[start..end];
    if body.trim().is_empty() {
        return;
    }

    if body.trim().len() > options.max_chunk_size {
        // Oversized section: recursive paragraph split, keeping the title.
        for sub in chunk_paragraph(body, options) {
            chunks.push(TextChunk::new(
                sub.content,
                chunks.len(),
                start + sub.start,
                start + sub.end,
                ChunkMetadata::Heading {
                    section_title: title.to_string(),
                },
            ));
        }
        return;
    }

    let lead = body.len() - body.trim_start().len();
    let content = body.trim();
    let index = chunks.len();
    chunks.push(TextChunk::new(
        content.to_string(),
        index,
        start + lead,
        start + lead + content.len(),
        ChunkMetadata::Heading {
            section_title: title.to_string(),
        },
    ));
}
