//! Qdrant REST adapter.
//!
//! Talks to a Qdrant server over its JSON HTTP API. Collections are
//! created lazily on first use with cosine distance and keyword payload
//! indexes on `tenant_id`, `source_id`, and `category`. Store-side errors
//! surface as [`StoreError`]; nothing is retried here so the ingestion
//! orchestrator can mark the source failed.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::VectorStoreConfig;
use crate::error::StoreError;
use crate::models::{VectorPayload, VectorRecord};

use super::{
    Condition, Filter, ScoredPoint, ScrollPage, StoredPoint, VectorStore, UPSERT_BATCH_SIZE,
};

const INDEXED_FIELDS: &[&str] = &["tenant_id", "source_id", "category"];

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    /// Collections already verified to exist in this process.
    initialized: Mutex<HashSet<String>>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
            initialized: Mutex::new(HashSet::new()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key.clone());
        }
        builder
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, StoreError> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::Backend {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Request(e.to_string()))
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", collection),
            )
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        match resp.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(StoreError::Backend {
                status: s,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// A missing collection reads as empty: deletes and lookups against it
/// are no-ops, matching the behavior of the in-memory backend.
fn absent_collection(err: &StoreError) -> bool {
    matches!(err, StoreError::Backend { status: 404, .. })
}

fn filter_to_json(filter: &Filter) -> Value {
    fn condition(c: &Condition) -> Value {
        match c {
            Condition::Match { field, value } => json!({
                "key": field,
                "match": { "value": value }
            }),
            Condition::MatchAny { field, values } => json!({
                "key": field,
                "match": { "any": values }
            }),
        }
    }
    let mut obj = serde_json::Map::new();
    if !filter.must.is_empty() {
        obj.insert(
            "must".to_string(),
            Value::Array(filter.must.iter().map(condition).collect()),
        );
    }
    if !filter.should.is_empty() {
        obj.insert(
            "should".to_string(),
            Value::Array(filter.should.iter().map(condition).collect()),
        );
    }
    Value::Object(obj)
}

fn parse_payload(value: &Value) -> Result<VectorPayload, StoreError> {
    serde_json::from_value(value.clone())
        .map_err(|e| StoreError::Request(format!("malformed payload: {}", e)))
}

fn parse_vector(value: Option<&Value>) -> Option<Vec<f32>> {
    value.and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .map(|x| x.as_f64().unwrap_or(0.0) as f32)
            .collect()
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), StoreError> {
        {
            let guard = self.initialized.lock().expect("initialized set poisoned");
            if guard.contains(collection) {
                return Ok(());
            }
        }

        if !self.collection_exists(collection).await? {
            debug!(collection, dims, "creating vector collection");
            self.call(
                reqwest::Method::PUT,
                &format!("/collections/{}", collection),
                Some(json!({
                    "vectors": { "size": dims, "distance": "Cosine" }
                })),
            )
            .await?;
        }
        for field in INDEXED_FIELDS {
            // Index creation is idempotent on the server side; an
            // already-exists answer is success.
            let result = self
                .call(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/index", collection),
                    Some(json!({
                        "field_name": field,
                        "field_schema": "keyword"
                    })),
                )
                .await;
            match result {
                Ok(_) => {}
                Err(StoreError::Backend { status: 409, .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.initialized
            .lock()
            .expect("initialized set poisoned")
            .insert(collection.to_string());
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
        self.ensure_collection(collection, records[0].vector.len())
            .await?;
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let points: Vec<Value> = batch
                .iter()
                .map(|r| {
                    Ok(json!({
                        "id": r.id,
                        "vector": r.vector,
                        "payload": serde_json::to_value(&r.payload)
                            .map_err(|e| StoreError::Request(e.to_string()))?,
                    }))
                })
                .collect::<Result<_, StoreError>>()?;
            self.call(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
                Some(json!({ "points": points })),
            )
            .await?;
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
        self.ensure_collection(collection, vector.len()).await?;
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "filter": filter_to_json(filter),
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let resp = self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", collection),
                Some(body),
            )
            .await?;
        let hits = resp
            .pointer("/result")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        hits.iter()
            .map(|hit| {
                let payload = parse_payload(hit.get("payload").unwrap_or(&Value::Null))?;
                Ok(ScoredPoint {
                    id: hit
                        .get("id")
                        .map(|i| i.as_str().map(|s| s.to_string()).unwrap_or_else(|| i.to_string()))
                        .unwrap_or_default(),
                    score: hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                    payload,
                })
            })
            .collect()
    }

    async fn get_by_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<StoredPoint>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp = match self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points", collection),
                Some(json!({
                    "ids": ids,
                    "with_payload": true,
                    "with_vector": false,
                })),
            )
            .await
        {
            Ok(resp) => resp,
            Err(e) if absent_collection(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let points = resp
            .pointer("/result")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        points
            .iter()
            .map(|p| {
                let payload = parse_payload(p.get("payload").unwrap_or(&Value::Null))?;
                Ok(StoredPoint {
                    id: p
                        .get("id")
                        .map(|i| i.as_str().map(|s| s.to_string()).unwrap_or_else(|| i.to_string()))
                        .unwrap_or_default(),
                    payload,
                    vector: parse_vector(p.get("vector")),
                })
            })
            .collect()
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        match self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", collection),
                Some(json!({ "points": ids })),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if absent_collection(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_by_filter(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<(), StoreError> {
        match self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", collection),
                Some(json!({ "filter": filter_to_json(filter) })),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if absent_collection(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let resp = match self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/count", collection),
                Some(json!({
                    "filter": filter_to_json(filter),
                    "exact": true,
                })),
            )
            .await
        {
            Ok(resp) => resp,
            Err(e) if absent_collection(&e) => return Ok(0),
            Err(e) => return Err(e),
        };
        Ok(resp
            .pointer("/result/count")
            .and_then(|c| c.as_u64())
            .unwrap_or(0))
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        offset: Option<String>,
    ) -> Result<ScrollPage, StoreError> {
        let mut body = json!({
            "filter": filter_to_json(filter),
            "limit": page_size,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let resp = match self
            .call(
                reqwest::Method::POST,
                &format!("/collections/{}/points/scroll", collection),
                Some(body),
            )
            .await
        {
            Ok(resp) => resp,
            Err(e) if absent_collection(&e) => {
                return Ok(ScrollPage {
                    points: Vec::new(),
                    next_offset: None,
                })
            }
            Err(e) => return Err(e),
        };
        let points = resp
            .pointer("/result/points")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        let points: Vec<StoredPoint> = points
            .iter()
            .map(|p| {
                let payload = parse_payload(p.get("payload").unwrap_or(&Value::Null))?;
                Ok(StoredPoint {
                    id: p
                        .get("id")
                        .map(|i| i.as_str().map(|s| s.to_string()).unwrap_or_else(|| i.to_string()))
                        .unwrap_or_default(),
                    payload,
                    vector: parse_vector(p.get("vector")),
                })
            })
            .collect::<Result<_, StoreError>>()?;
        let next_offset = resp
            .pointer("/result/next_page_offset")
            .and_then(|o| o.as_str().map(|s| s.to_string()).or_else(|| {
                if o.is_null() {
                    None
                } else {
                    Some(o.to_string())
                }
            }));
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_shape() {
        let filter = Filter::tenant("acme")
            .with_category("docs")
            .with_sources(&["s1".to_string(), "s2".to_string()]);
        let json = filter_to_json(&filter);
        assert_eq!(json["must"][0]["key"], "tenant_id");
        assert_eq!(json["must"][0]["match"]["value"], "acme");
        assert_eq!(json["must"][1]["key"], "category");
        assert_eq!(json["should"][0]["match"]["any"][1], "s2");
    }

    #[test]
    fn empty_filter_serializes_to_empty_object() {
        let json = filter_to_json(&Filter::default());
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn only_missing_collection_reads_as_empty() {
        assert!(absent_collection(&StoreError::Backend {
            status: 404,
            body: String::new(),
        }));
        assert!(!absent_collection(&StoreError::Backend {
            status: 500,
            body: String::new(),
        }));
        assert!(!absent_collection(&StoreError::Request("timed out".into())));
    }
}
