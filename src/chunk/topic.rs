//! Topic-based chunking driven by keyword overlap between sentences.
//!
//! Walks sentences, tracking the stop-word-filtered keyword set of the
//! chunk under construction. A new chunk opens on a size limit, on a
//! keyword-overlap drop below the semantic threshold, or on a discourse
//! marker that disagrees with the recent context. Emitted chunks record
//! their top keywords and a coherence score, and sibling chunk ids are
//! back-filled across the document once segmentation completes.

use std::collections::{BTreeMap, HashSet};

use crate::models::{ChunkMetadata, TextChunk};

use super::{split_sentences, ChunkOptions, Span};

/// Sentence openers that signal a topic shift.
const DISCOURSE_MARKERS: &[&str] = &[
    "however",
    "furthermore",
    "moreover",
    "nevertheless",
    "in conclusion",
    "in contrast",
    "on the other hand",
    "meanwhile",
    "alternatively",
    "in summary",
];

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have",
    "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "like", "may",
    "me", "more", "most", "my", "no", "not", "of", "on", "one", "only", "or", "other", "our",
    "out", "she", "should", "so", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "up", "us", "was", "we", "were", "what", "when",
    "where", "which", "who", "will", "with", "would", "you", "your",
];

/// Number of keywords recorded per emitted chunk.
const TOP_KEYWORDS: usize = 10;

/// How many trailing sentences a discourse marker is compared against.
const MARKER_CONTEXT_SENTENCES: usize = 3;

pub fn chunk_topic(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let keyword_sets: Vec<HashSet<String>> = sentences
        .iter()
        .map(|s| extract_keywords(&text[s.start..s.end]))
        .collect();

    let mut builder = ChunkBuilder::default();
    let mut chunks: Vec<TextChunk> = Vec::new();

    for (i, &sentence) in sentences.iter().enumerate() {
        let keywords = &keyword_sets[i];

        if !builder.is_empty() {
            let overlap = jaccard(&builder.keywords, keywords);
            let size_break = builder.len >= options.chunk_size;
            let drift_break = overlap < options.semantic_threshold
                && builder.len >= options.min_chunk_size;
            let marker_break = opens_with_marker(&text[sentence.start..sentence.end])
                && low_recent_overlap(&keyword_sets, i, options.semantic_threshold);

            if size_break || drift_break || marker_break {
                // Overlap sentences: walk backward from the chunk end
                // until the overlap character budget is met. A marker
                // break starts clean; the topic changed.
                let overlap = if marker_break {
                    Vec::new()
                } else {
                    builder.overlap_tail(options.chunk_overlap)
                };
                builder.emit(text, &mut chunks);
                for (span, idx) in overlap {
                    builder.push(span, idx, &keyword_sets[idx]);
                }
            }
        }

        builder.push(sentence, i, keywords);
    }
    builder.emit(text, &mut chunks);

    super::merge_small_tail(&mut chunks, text, options.min_chunk_size);
    backfill_siblings(&mut chunks);
    chunks
}

#[derive(Default)]
struct ChunkBuilder {
    sentences: Vec<(Span, usize)>,
    keywords: HashSet<String>,
    keyword_counts: BTreeMap<String, usize>,
    len: usize,
}

impl ChunkBuilder {
    fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    fn push(&mut self, span: Span, index: usize, keywords: &HashSet<String>) {
        self.sentences.push((span, index));
        self.len += span.len();
        for k in keywords {
            self.keywords.insert(k.clone());
            *self.keyword_counts.entry(k.clone()).or_insert(0) += 1;
        }
    }

    fn emit(&mut self, text: &str, chunks: &mut Vec<TextChunk>) {
        let Some(&(first, _)) = self.sentences.first() else {
            return;
        };
        let (last, _) = *self.sentences.last().expect("non-empty");
        let end = last.end;
        // The overlap tail can make the whole buffer a suffix of the
        // previous chunk; emitting it again would add no new text.
        if chunks.last().map(|c| end <= c.end).unwrap_or(false) {
            self.clear();
            return;
        }
        let raw = &text[first.start..end];
        let lead = raw.len() - raw.trim_start().len();
        let content = raw.trim();
        if content.is_empty() {
            self.clear();
            return;
        }

        let mut top: Vec<(String, usize)> = self
            .keyword_counts
            .iter()
            .map(|(k, &n)| (k.clone(), n))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keywords: Vec<String> = top.into_iter().take(TOP_KEYWORDS).map(|(k, _)| k).collect();

        let coherence = self.coherence(text);
        let index = chunks.len();
        chunks.push(TextChunk::new(
            content.to_string(),
            index,
            first.start + lead,
            first.start + lead + content.len(),
            ChunkMetadata::Topic {
                keywords,
                coherence,
                sibling_ids: Vec::new(),
            },
        ));
        self.clear();
    }

    /// Mean pairwise keyword overlap between consecutive sentences.
    fn coherence(&self, text: &str) -> f32 {
        if self.sentences.len() < 2 {
            return 1.0;
        }
        let sets: Vec<HashSet<String>> = self
            .sentences
            .iter()
            .map(|(s, _)| extract_keywords(&text[s.start..s.end]))
            .collect();
        let mut total = 0.0f32;
        for pair in sets.windows(2) {
            total += jaccard(&pair[0], &pair[1]);
        }
        total / (sets.len() - 1) as f32
    }

    fn clear(&mut self) {
        self.sentences.clear();
        self.keywords.clear();
        self.keyword_counts.clear();
        self.len = 0;
    }

    /// Trailing sentences of the current buffer that fit the overlap
    /// character budget, oldest first.
    fn overlap_tail(&self, budget: usize) -> Vec<(Span, usize)> {
        if budget == 0 {
            return Vec::new();
        }
        let mut tail: Vec<(Span, usize)> = Vec::new();
        let mut size = 0usize;
        for &(span, idx) in self.sentences.iter().rev() {
            if size + span.len() > budget && !tail.is_empty() {
                break;
            }
            size += span.len();
            tail.push((span, idx));
            if size >= budget {
                break;
            }
        }
        tail.reverse();
        tail
    }
}

/// True if the sentence opens with a discourse marker.
fn opens_with_marker(sentence: &str) -> bool {
    let lowered = sentence.trim_start().to_lowercase();
    DISCOURSE_MARKERS
        .iter()
        .any(|m| lowered.starts_with(m))
}

/// True when the sentence at `i` shares little vocabulary with the last
/// few sentences before it.
fn low_recent_overlap(keyword_sets: &[HashSet<String>], i: usize, threshold: f32) -> bool {
    let lo = i.saturating_sub(MARKER_CONTEXT_SENTENCES);
    let mut recent: HashSet<String> = HashSet::new();
    for set in &keyword_sets[lo..i] {
        recent.extend(set.iter().cloned());
    }
    jaccard(&recent, &keyword_sets[i]) < threshold
}

/// Lowercased words of 3+ characters minus stop words.
pub(crate) fn extract_keywords(sentence: &str) -> HashSet<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard-style overlap between two keyword sets.
pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

/// Wire previous/next chunk ids into every topic chunk's metadata.
fn backfill_siblings(chunks: &mut [TextChunk]) {
    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        if let ChunkMetadata::Topic { sibling_ids, .. } = &mut chunk.metadata {
            let mut siblings = Vec::new();
            if i > 0 {
                siblings.push(ids[i - 1].clone());
            }
            if i + 1 < ids.len() {
                siblings.push(ids[i + 1].clone());
            }
            *sibling_ids = siblings;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Five sentences about cats, a "However" transition, five
    /// about engines — the split lands at or after the transition.
    #[test]
    fn splits_on_topic_shift() {
        let cats = "Cats sleep most of the day. Cats groom their fur constantly. \
            A cat hunts small prey at night. Cats purr when content. \
            Every cat guards its territory. ";
        let transition = "However, engines are a different subject entirely. ";
        let engines = "Engines convert fuel into motion. An engine needs regular oil changes. \
            Diesel engines compress air before injection. Engine cylinders fire in sequence. \
            Turbocharged engines force extra air intake.";
        let text = format!("{}{}{}", cats, transition, engines);

        let options = ChunkOptions {
            chunk_size: 2000,
            chunk_overlap: 0,
            min_chunk_size: 200,
            semantic_threshold: 0.2,
            ..ChunkOptions::default()
        };
        let chunks = chunk_topic(&text, &options);
        assert!(chunks.len() >= 2, "expected a split, got {} chunk(s)", chunks.len());
        assert!(chunks[0].content.contains("Cats"));
        assert!(!chunks[0].content.contains("Turbocharged"));
        let second = &chunks[1].content;
        assert!(second.contains("engines") || second.contains("Engines"));
    }

    #[test]
    fn records_keywords_and_coherence() {
        let text = "Rust compiles fast binaries. Rust checks memory at compile time. \
            Rust programs avoid data races.";
        let chunks = chunk_topic(
            text,
            &ChunkOptions {
                min_chunk_size: 10,
                ..ChunkOptions::default()
            },
        );
        assert_eq!(chunks.len(), 1);
        match &chunks[0].metadata {
            ChunkMetadata::Topic {
                keywords,
                coherence,
                ..
            } => {
                assert!(keywords.contains(&"rust".to_string()));
                assert!(*coherence > 0.0);
            }
            other => panic!("expected topic metadata, got {:?}", other),
        }
    }

    #[test]
    fn siblings_reference_neighbor_ids() {
        let topic_a = "Databases store rows in tables. Databases index columns for speed. \
            A database enforces constraints. ";
        let topic_b = "However, sailing boats use wind power. Sails catch the moving air. \
            A boat heels under strong wind.";
        let text = format!("{}{}", topic_a, topic_b);
        let chunks = chunk_topic(
            &text,
            &ChunkOptions {
                chunk_size: 2000,
                min_chunk_size: 60,
                semantic_threshold: 0.2,
                ..ChunkOptions::default()
            },
        );
        assert!(chunks.len() >= 2);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        match &chunks[0].metadata {
            ChunkMetadata::Topic { sibling_ids, .. } => {
                assert_eq!(sibling_ids, &vec![ids[1].to_string()]);
            }
            other => panic!("expected topic metadata, got {:?}", other),
        }
        match &chunks[1].metadata {
            ChunkMetadata::Topic { sibling_ids, .. } => {
                assert!(sibling_ids.contains(&ids[0].to_string()));
            }
            other => panic!("expected topic metadata, got {:?}", other),
        }
    }

    #[test]
    fn size_limit_forces_split() {
        let text: String = (0..30)
            .map(|i| format!("Gardening tip number {} concerns soil and water. ", i))
            .collect();
        let chunks = chunk_topic(
            &text,
            &ChunkOptions {
                chunk_size: 300,
                chunk_overlap: 0,
                min_chunk_size: 50,
                semantic_threshold: 0.05,
                ..ChunkOptions::default()
            },
        );
        assert!(chunks.len() > 1);
    }

    #[test]
    fn jaccard_edge_cases() {
        let a: HashSet<String> = ["cat", "dog"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["cat", "fish"].iter().map(|s| s.to_string()).collect();
        let empty = HashSet::new();
        assert!((jaccard(&a, &a) - 1.0).abs() < f32::EPSILON);
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(jaccard(&a, &empty), 0.0);
        assert_eq!(jaccard(&empty, &empty), 1.0);
    }
}
