//! Embedding client: batched, rate-limit-aware calls to an external
//! embedding provider, plus local vector utilities.
//!
//! Providers:
//! - **`openai`** — an OpenAI-compatible `/embeddings` endpoint. Batches
//!   are submitted sequentially with a short delay between them; a 429
//!   response sleeps for the provider's `retry-after` (1 s default) and
//!   retries that batch once per occurrence.
//! - **`hash`** — deterministic offline embeddings from hashed word
//!   counts. Good enough for development and tests: identical text maps
//!   to an identical vector, shared vocabulary raises similarity.
//! - **`disabled`** — every call fails with [`EmbeddingError::Disabled`].

use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use crate::models::estimate_tokens;

/// Dimension of `hash`-provider vectors.
const HASH_DIMS: usize = 256;

/// Safety buffer subtracted from the max input budget before truncation.
const TRUNCATION_BUFFER_TOKENS: usize = 128;

/// Batched embedding output: one vector per input, in input order, plus
/// the provider-reported token usage.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: u32,
}

/// Client over the configured embedding provider.
#[derive(Clone)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    /// Vector dimensionality produced by the configured provider.
    pub fn dims(&self) -> usize {
        match self.config.provider.as_str() {
            "hash" => HASH_DIMS,
            _ => self.config.dims.unwrap_or(1536),
        }
    }

    pub fn model_name(&self) -> &str {
        match self.config.provider.as_str() {
            "hash" => "hash",
            _ => self.config.model.as_deref().unwrap_or("unknown"),
        }
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".into()))
    }

    /// Embed a batch of texts. Inputs larger than the configured batch
    /// size are split and submitted sequentially, with a short delay
    /// between provider calls to stay under rate limits.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                total_tokens: 0,
            });
        }
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| self.preprocess(t))
            .collect();

        match self.config.provider.as_str() {
            "openai" => self.embed_openai_batched(&prepared).await,
            "hash" => Ok(embed_hash_batch(&prepared)),
            "disabled" => Err(EmbeddingError::Disabled),
            other => Err(EmbeddingError::Request(format!(
                "unknown embedding provider: {}",
                other
            ))),
        }
    }

    /// Collapse whitespace and truncate to the max-token budget with a
    /// safety buffer.
    fn preprocess(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let budget_tokens = self
            .config
            .max_input_tokens
            .saturating_sub(TRUNCATION_BUFFER_TOKENS)
            .max(1);
        let budget_chars = budget_tokens * 4;
        if collapsed.chars().count() <= budget_chars {
            return collapsed;
        }
        collapsed.chars().take(budget_chars).collect()
    }

    async fn embed_openai_batched(
        &self,
        texts: &[String],
    ) -> Result<EmbeddingBatch, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut total_tokens = 0u32;
        let batch_size = self.config.batch_size.max(1);

        for (i, batch) in texts.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
            let out = self.embed_openai_once(batch).await?;
            vectors.extend(out.vectors);
            total_tokens += out.total_tokens;
        }
        Ok(EmbeddingBatch {
            vectors,
            total_tokens,
        })
    }

    /// One provider call. A 429 sleeps for the retry-after hint and
    /// retries the same batch; the loop re-arms on repeated limiting.
    async fn embed_openai_once(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError> {
        let model = self
            .config
            .model
            .as_deref()
            .ok_or_else(|| EmbeddingError::Request("embedding.model not configured".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EmbeddingError::Request("OPENAI_API_KEY not set".into()))?;

        let mut body = serde_json::json!({
            "model": model,
            "input": texts,
        });
        if let Some(dims) = self.config.dims {
            body["dimensions"] = serde_json::json!(dims);
        }
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));

        loop {
            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbeddingError::Request(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let delay = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(delay_secs = delay, "embedding provider rate limited; retrying batch");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(EmbeddingError::Provider {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
            return parse_embeddings_response(&json, texts.len());
        }
    }
}

/// Parse an OpenAI-style embeddings response, preserving input order via
/// the per-item `index` field.
fn parse_embeddings_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<EmbeddingBatch, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".into()))?;
    if data.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }

    let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".into()))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if index >= expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "embedding index {} out of range",
                index
            )));
        }
        vectors[index] = vec;
    }

    let total_tokens = json
        .pointer("/usage/total_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as u32;
    debug!(count = expected, total_tokens, "embedded batch");

    Ok(EmbeddingBatch {
        vectors,
        total_tokens,
    })
}

// ============ Hash provider ============

/// Deterministic bag-of-words embedding: each word hashes to a bucket and
/// a sign, counts are accumulated, and the vector is L2-normalized.
fn embed_hash(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; HASH_DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let digest = Sha256::digest(word.to_lowercase().as_bytes());
        let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % HASH_DIMS;
        let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign;
    }
    normalize(&mut vec);
    vec
}

fn embed_hash_batch(texts: &[String]) -> EmbeddingBatch {
    let vectors = texts.iter().map(|t| embed_hash(t)).collect();
    let total_tokens = texts.iter().map(|t| estimate_tokens(t) as u32).sum();
    EmbeddingBatch {
        vectors,
        total_tokens,
    }
}

// ============ Vector utilities ============

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// L2-normalize in place. A zero vector is left unchanged.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for v in vec.iter_mut() {
        *v /= norm;
    }
}

/// Indices and scores of the `k` candidates most similar to `query`,
/// sorted by descending similarity.
pub fn top_k_similar(query: &[f32], candidates: &[Vec<f32>], k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, c)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    fn hash_client() -> EmbeddingClient {
        EmbeddingClient::new(&EmbeddingConfig {
            provider: "hash".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let client = hash_client();
        let a = client.embed("the refund policy covers thirty days").await.unwrap();
        let b = client.embed("the refund policy covers thirty days").await.unwrap();
        assert!(cosine_similarity(&a, &b) >= 0.999);
    }

    #[tokio::test]
    async fn unrelated_sentences_score_below_default_threshold() {
        let client = hash_client();
        let a = client.embed("the refund policy covers thirty days").await.unwrap();
        let b = client.embed("quantum entanglement defies local realism").await.unwrap();
        assert!(cosine_similarity(&a, &b) < 0.7);
    }

    #[tokio::test]
    async fn related_sentences_score_above_unrelated() {
        let client = hash_client();
        let query = client.embed("how do refunds work").await.unwrap();
        let related = client.embed("refunds work within thirty days").await.unwrap();
        let unrelated = client.embed("sailing requires steady wind").await.unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_counts_tokens() {
        let client = hash_client();
        let texts = vec!["alpha one".to_string(), "beta two".to_string()];
        let batch = client.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.vectors.len(), 2);
        assert!(batch.total_tokens > 0);
        let single = client.embed("beta two").await.unwrap();
        assert!(cosine_similarity(&batch.vectors[1], &single) >= 0.999);
    }

    #[tokio::test]
    async fn disabled_provider_errors() {
        let client = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();
        let err = client.embed("anything").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
    }

    #[test]
    fn preprocess_collapses_and_truncates() {
        let client = hash_client();
        assert_eq!(client.preprocess("a   b\n\n c"), "a b c");
        let long = "word ".repeat(20_000);
        let out = client.preprocess(&long);
        assert!(out.chars().count() <= (8000 - 128) * 4);
    }

    #[test]
    fn parse_response_restores_index_order() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ],
            "usage": { "total_tokens": 7 }
        });
        let batch = parse_embeddings_response(&json, 2).unwrap();
        assert_eq!(batch.vectors[0], vec![1.0, 0.0]);
        assert_eq!(batch.vectors[1], vec![0.0, 1.0]);
        assert_eq!(batch.total_tokens, 7);
    }

    #[test]
    fn top_k_ranks_by_similarity() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![-1.0, 0.0]];
        let top = top_k_similar(&query, &candidates, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, 1);
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
