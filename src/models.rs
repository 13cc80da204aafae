//! Core data models that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Lifecycle status of a [`KnowledgeSource`].
///
/// All transitions go through [`SourceStatus::transition`]; update sites
/// never write a status string directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Indexed => "indexed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SourceStatus::Pending),
            "processing" => Some(SourceStatus::Processing),
            "indexed" => Some(SourceStatus::Indexed),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }

    /// Validate a transition and return the new status.
    ///
    /// Legal edges:
    /// - `pending -> processing`
    /// - `processing -> indexed | failed`
    /// - `indexed -> processing` (re-submission)
    /// - `failed -> processing` (retry)
    pub fn transition(self, to: SourceStatus) -> Result<SourceStatus, TransitionError> {
        use SourceStatus::*;
        let ok = matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Indexed)
                | (Processing, Failed)
                | (Indexed, Processing)
                | (Failed, Processing)
        );
        if ok {
            Ok(to)
        } else {
            Err(TransitionError {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

/// Where a knowledge source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    File,
    Url,
    Text,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOrigin::File => "file",
            SourceOrigin::Url => "url",
            SourceOrigin::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(SourceOrigin::File),
            "url" => Some(SourceOrigin::Url),
            "text" => Some(SourceOrigin::Text),
            _ => None,
        }
    }
}

/// A tenant-scoped document or URL registered for ingestion.
///
/// The row lives in SQLite; only the ingestion pipeline mutates it.
#[derive(Debug, Clone)]
pub struct KnowledgeSource {
    pub id: String,
    pub tenant_id: String,
    pub origin: SourceOrigin,
    pub title: Option<String>,
    pub category: Option<String>,
    pub status: SourceStatus,
    pub chunk_count: i64,
    pub token_count: i64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub deleted: bool,
}

/// Strategy-specific chunk metadata.
///
/// A closed tagged type rather than an open field bag: each chunking
/// strategy has exactly one variant, serialized with a `strategy` tag so
/// payloads stay self-describing in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ChunkMetadata {
    Fixed,
    Sentence,
    Paragraph {
        paragraph_index: usize,
    },
    Heading {
        section_title: String,
    },
    Topic {
        keywords: Vec<String>,
        coherence: f32,
        #[serde(default)]
        sibling_ids: Vec<String>,
    },
}

/// A bounded span of a source's extracted text. Transient: exists between
/// chunking and vector storage, never mutated after creation. The id is
/// assigned at creation and becomes the vector record id, which lets the
/// topic chunker wire sibling references before anything is stored.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub id: String,
    pub content: String,
    /// Ordinal position within the source, starting at 0.
    pub index: usize,
    /// Offsets into the normalized source text.
    pub start: usize,
    pub end: usize,
    pub token_estimate: usize,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    pub fn new(
        content: impl Into<String>,
        index: usize,
        start: usize,
        end: usize,
        metadata: ChunkMetadata,
    ) -> Self {
        let content = content.into();
        let token_estimate = estimate_tokens(&content);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            index,
            start,
            end,
            token_estimate,
            metadata,
        }
    }
}

/// Coarse token estimate: `ceil(chars / 4)`. Not a tokenizer call.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Payload stored alongside each vector. Closed shape; every field is
/// required except `category`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub tenant_id: String,
    pub source_id: String,
    #[serde(default)]
    pub category: Option<String>,
    pub content: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

/// The externally stored unit: id + embedding + payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// A tenant-scoped question/answer pair, embedded independently of
/// document chunks and searched in its own collection.
#[derive(Debug, Clone)]
pub struct FaqItem {
    pub id: String,
    pub tenant_id: String,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FaqItem {
    /// Text submitted to the embedding model for this FAQ.
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.question, self.answer)
    }
}

/// A chunk returned from retrieval, with its final score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
    /// Sibling content attached by context expansion, if any.
    pub expanded_context: Vec<String>,
}

/// An FAQ returned from retrieval.
#[derive(Debug, Clone)]
pub struct RetrievedFaq {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub score: f32,
}

/// Result of one retrieval call. Ephemeral; rebuilt per query.
#[derive(Debug, Clone)]
pub struct RagContext {
    pub chunks: Vec<RetrievedChunk>,
    pub faqs: Vec<RetrievedFaq>,
    /// Query variants that were actually searched (original first).
    pub queries: Vec<String>,
    pub elapsed_ms: u64,
    /// Generation-ready context string: FAQs first, then numbered chunks.
    pub context: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use SourceStatus::*;
        assert_eq!(Pending.transition(Processing).unwrap(), Processing);
        assert_eq!(Processing.transition(Indexed).unwrap(), Indexed);
        assert_eq!(Processing.transition(Failed).unwrap(), Failed);
        assert_eq!(Indexed.transition(Processing).unwrap(), Processing);
        assert_eq!(Failed.transition(Processing).unwrap(), Processing);
    }

    #[test]
    fn illegal_transitions_rejected() {
        use SourceStatus::*;
        assert!(Pending.transition(Indexed).is_err());
        assert!(Indexed.transition(Pending).is_err());
        assert!(Indexed.transition(Failed).is_err());
        assert!(Failed.transition(Indexed).is_err());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn chunk_metadata_tagged_serialization() {
        let meta = ChunkMetadata::Heading {
            section_title: "Refunds".to_string(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["strategy"], "heading");
        assert_eq!(json["section_title"], "Refunds");
        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
