//! In-memory vector store: exact cosine scan with full filter semantics.
//!
//! The fallback backend and the integration-test double. Collections are
//! plain maps behind one async RwLock; ordering inside a collection is by
//! point id, which gives scroll a stable cursor.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::VectorRecord;

use super::{Filter, ScoredPoint, ScrollPage, StoredPoint, VectorStore};

#[derive(Default)]
struct Collection {
    dims: usize,
    points: BTreeMap<String, VectorRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dims,
                points: BTreeMap::new(),
            });
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let dims = records[0].vector.len();
        let mut guard = self.collections.write().await;
        let coll = guard
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dims,
                points: BTreeMap::new(),
            });
        for record in records {
            if record.vector.len() != coll.dims {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: coll.dims,
                    actual: record.vector.len(),
                });
            }
            coll.points.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<ScoredPoint> = coll
            .points
            .values()
            .filter(|r| filter.matches(&r.payload))
            .map(|r| ScoredPoint {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                payload: r.payload.clone(),
            })
            .filter(|h| score_threshold.map(|t| h.score >= t).unwrap_or(true))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredPoint>, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| coll.points.get(id))
            .map(|r| StoredPoint {
                id: r.id.clone(),
                payload: r.payload.clone(),
                vector: Some(r.vector.clone()),
            })
            .collect())
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        if let Some(coll) = guard.get_mut(collection) {
            for id in ids {
                coll.points.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_filter(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        if let Some(coll) = guard.get_mut(collection) {
            coll.points.retain(|_, r| !filter.matches(&r.payload));
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(0);
        };
        Ok(coll
            .points
            .values()
            .filter(|r| filter.matches(&r.payload))
            .count() as u64)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(ScrollPage {
                points: Vec::new(),
                next_offset: None,
            });
        };
        let mut points: Vec<StoredPoint> = Vec::new();
        let mut next_offset = None;
        let iter: Box<dyn Iterator<Item = (&String, &VectorRecord)>> = match &offset {
            Some(from) => Box::new(coll.points.range(from.clone()..)),
            None => Box::new(coll.points.iter()),
        };
        for (id, record) in iter {
            if !filter.matches(&record.payload) {
                continue;
            }
            if points.len() == page_size {
                next_offset = Some(id.clone());
                break;
            }
            points.push(StoredPoint {
                id: record.id.clone(),
                payload: record.payload.clone(),
                vector: Some(record.vector.clone()),
            });
        }
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, VectorPayload};

    fn record(id: &str, tenant: &str, source: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            payload: VectorPayload {
                tenant_id: tenant.to_string(),
                source_id: source.to_string(),
                category: None,
                content: format!("content {}", id),
                chunk_index: 0,
                token_count: 2,
                metadata: ChunkMetadata::Fixed,
            },
        }
    }

    #[tokio::test]
    async fn search_respects_tenant_filter() {
        let store = MemoryStore::new();
        store
            .upsert(
                "chunks",
                vec![
                    record("a", "t1", "s1", vec![1.0, 0.0]),
                    record("b", "t2", "s2", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("chunks", &[1.0, 0.0], 10, &Filter::tenant("t1"), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn search_before_collection_exists_is_empty() {
        let store = MemoryStore::new();
        let hits = store
            .search("missing", &[1.0], 5, &Filter::tenant("t"), None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_rejects_mixed_dimensions() {
        let store = MemoryStore::new();
        store
            .upsert("chunks", vec![record("a", "t", "s", vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .upsert("chunks", vec![record("b", "t", "s", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let store = MemoryStore::new();
        store
            .upsert("chunks", vec![record("a", "t", "s", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("chunks", vec![record("a", "t", "s", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count("chunks", &Filter::tenant("t")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_by_filter_scopes_to_source() {
        let store = MemoryStore::new();
        store
            .upsert(
                "chunks",
                vec![
                    record("a", "t", "s1", vec![1.0, 0.0]),
                    record("b", "t", "s2", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .delete_by_filter("chunks", &Filter::tenant("t").with_source("s1"))
            .await
            .unwrap();
        assert_eq!(store.count("chunks", &Filter::tenant("t")).await.unwrap(), 1);
        let left = store
            .get_by_ids("chunks", &["b".to_string()])
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn scroll_pages_through_all_points() {
        let store = MemoryStore::new();
        let records: Vec<VectorRecord> = (0..25)
            .map(|i| record(&format!("id-{:02}", i), "t", "s", vec![1.0, 0.0]))
            .collect();
        store.upsert("chunks", records).await.unwrap();

        let mut seen = 0usize;
        let mut offset = None;
        loop {
            let page = store
                .scroll("chunks", &Filter::tenant("t"), 10, offset)
                .await
                .unwrap();
            seen += page.points.len();
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 25);
    }

    #[tokio::test]
    async fn score_threshold_drops_weak_hits() {
        let store = MemoryStore::new();
        store
            .upsert(
                "chunks",
                vec![
                    record("a", "t", "s", vec![1.0, 0.0]),
                    record("b", "t", "s", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("chunks", &[1.0, 0.0], 10, &Filter::tenant("t"), Some(0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }
}
