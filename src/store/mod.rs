//! Vector storage backends behind a unified [`VectorStore`] trait.
//!
//! Collections are created lazily and idempotently on first use, with
//! keyword indexes on the filterable payload fields (tenant id, source
//! id, category). Every search carries a tenant filter; a result crossing
//! tenants is a correctness bug, not a relevance problem.

mod memory;
mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;

use crate::config::VectorStoreConfig;
use crate::error::StoreError;
use crate::models::{VectorPayload, VectorRecord};

/// Points per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Exact-match condition on an indexed payload field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Match { field: String, value: String },
    MatchAny { field: String, values: Vec<String> },
}

/// Conjunction of `must` conditions plus an optional `should` group
/// (at least one must hold when non-empty).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<Condition>,
    pub should: Vec<Condition>,
}

impl Filter {
    /// Base filter every search starts from: the tenant constraint.
    pub fn tenant(tenant_id: &str) -> Self {
        Self {
            must: vec![Condition::Match {
                field: "tenant_id".to_string(),
                value: tenant_id.to_string(),
            }],
            should: Vec::new(),
        }
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.must.push(Condition::Match {
            field: "source_id".to_string(),
            value: source_id.to_string(),
        });
        self
    }

    /// Restrict to any of the given sources.
    pub fn with_sources(mut self, source_ids: &[String]) -> Self {
        if !source_ids.is_empty() {
            self.should.push(Condition::MatchAny {
                field: "source_id".to_string(),
                values: source_ids.to_vec(),
            });
        }
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.must.push(Condition::Match {
            field: "category".to_string(),
            value: category.to_string(),
        });
        self
    }

    /// Evaluate against a payload. Used by the in-memory backend and by
    /// tests to pin the filter semantics the adapters must honor.
    pub fn matches(&self, payload: &VectorPayload) -> bool {
        let check = |c: &Condition| -> bool {
            match c {
                Condition::Match { field, value } => {
                    payload_field(payload, field).map(|v| v == value).unwrap_or(false)
                }
                Condition::MatchAny { field, values } => payload_field(payload, field)
                    .map(|v| values.iter().any(|x| x == v))
                    .unwrap_or(false),
            }
        };
        self.must.iter().all(check) && (self.should.is_empty() || self.should.iter().any(check))
    }
}

fn payload_field<'a>(payload: &'a VectorPayload, field: &str) -> Option<&'a str> {
    match field {
        "tenant_id" => Some(payload.tenant_id.as_str()),
        "source_id" => Some(payload.source_id.as_str()),
        "category" => payload.category.as_deref(),
        _ => None,
    }
}

/// A search hit: stored point plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: VectorPayload,
}

/// A stored point fetched without searching.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub payload: VectorPayload,
    pub vector: Option<Vec<f32>>,
}

/// One page of a scroll; `next_offset` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<StoredPoint>,
    pub next_offset: Option<String>,
}

/// Storage contract over named collections with a fixed vector dimension
/// and cosine distance.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and its payload indexes if missing. Safe to
    /// call repeatedly; called implicitly by the mutating operations.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError>;

    /// Insert or replace points, in batches of [`UPSERT_BATCH_SIZE`].
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>)
        -> Result<(), StoreError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    async fn get_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredPoint>, StoreError>;

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    async fn delete_by_filter(&self, collection: &str, filter: &Filter)
        -> Result<(), StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Unbounded pagination over points matching the filter.
    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, StoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend.
pub fn create_store(config: &VectorStoreConfig) -> Result<Box<dyn VectorStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "qdrant" => Ok(Box::new(QdrantStore::new(config)?)),
        other => Err(StoreError::Request(format!(
            "unknown vector store backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn payload(tenant: &str, source: &str, category: Option<&str>) -> VectorPayload {
        VectorPayload {
            tenant_id: tenant.to_string(),
            source_id: source.to_string(),
            category: category.map(|c| c.to_string()),
            content: "body".to_string(),
            chunk_index: 0,
            token_count: 1,
            metadata: ChunkMetadata::Fixed,
        }
    }

    #[test]
    fn tenant_filter_is_a_must_condition() {
        let filter = Filter::tenant("acme");
        assert!(filter.matches(&payload("acme", "s1", None)));
        assert!(!filter.matches(&payload("other", "s1", None)));
    }

    #[test]
    fn category_and_source_layer_on_top() {
        let filter = Filter::tenant("acme").with_category("docs").with_source("s1");
        assert!(filter.matches(&payload("acme", "s1", Some("docs"))));
        assert!(!filter.matches(&payload("acme", "s2", Some("docs"))));
        assert!(!filter.matches(&payload("acme", "s1", Some("faq"))));
        assert!(!filter.matches(&payload("acme", "s1", None)));
    }

    #[test]
    fn should_group_matches_any_listed_source() {
        let filter =
            Filter::tenant("acme").with_sources(&["s1".to_string(), "s2".to_string()]);
        assert!(filter.matches(&payload("acme", "s2", None)));
        assert!(!filter.matches(&payload("acme", "s3", None)));
    }

    #[test]
    fn empty_source_list_does_not_constrain() {
        let filter = Filter::tenant("acme").with_sources(&[]);
        assert!(filter.matches(&payload("acme", "anything", None)));
    }
}
