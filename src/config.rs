use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            strategy: default_strategy(),
            semantic_threshold: default_semantic_threshold(),
            max_content_length: default_max_content_length(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_max_chunk_size() -> usize {
    2000
}
fn default_strategy() -> String {
    "paragraph".to_string()
}
fn default_semantic_threshold() -> f32 {
    0.3
}
fn default_max_content_length() -> usize {
    2_000_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Milliseconds slept between sequential batches of one embed_batch call.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            max_input_tokens: default_max_input_tokens(),
            timeout_secs: default_timeout_secs(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_input_tokens() -> usize {
    8000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_delay_ms() -> u64 {
    100
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chunk_collection")]
    pub chunk_collection: String,
    #[serde(default = "default_faq_collection")]
    pub faq_collection: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
            api_key: None,
            chunk_collection: default_chunk_collection(),
            faq_collection: default_faq_collection(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_chunk_collection() -> String {
    "chunks".to_string()
}
fn default_faq_collection() -> String {
    "faqs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Per-variant over-fetch multiplier before deduplication.
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
    /// Weight on the semantic score in hybrid mode; keyword gets 1 - alpha.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    /// Page size and cap for the hybrid keyword scroll scan.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    #[serde(default = "default_max_scan_pages")]
    pub max_scan_pages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_score: default_min_score(),
            fetch_multiplier: default_fetch_multiplier(),
            max_expansions: default_max_expansions(),
            hybrid_alpha: default_hybrid_alpha(),
            scan_page_size: default_scan_page_size(),
            max_scan_pages: default_max_scan_pages(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.7
}
fn default_fetch_multiplier() -> usize {
    3
}
fn default_max_expansions() -> usize {
    3
}
fn default_hybrid_alpha() -> f32 {
    0.7
}
fn default_scan_page_size() -> usize {
    100
}
fn default_max_scan_pages() -> usize {
    10
}

/// LLM used for query expansion and cross-encoder reranking. Optional:
/// when disabled, retrieval degrades to the original query and the
/// keyword reranker.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if c.chunk_overlap >= c.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunk_size");
    }
    if c.max_chunk_size < c.chunk_size {
        anyhow::bail!("chunking.max_chunk_size must be >= chunk_size");
    }
    if !(0.0..=1.0).contains(&c.semantic_threshold) {
        anyhow::bail!("chunking.semantic_threshold must be in [0.0, 1.0]");
    }

    match config.chunking.strategy.as_str() {
        "fixed" | "sentence" | "paragraph" | "heading" | "topic" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be fixed, sentence, paragraph, heading, or topic.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() && config.embedding.provider == "openai" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
            other
        ),
    }

    match config.vector_store.backend.as_str() {
        "qdrant" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector store backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    if config.retrieval.limit == 0 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.max_scan_pages == 0 {
        anyhow::bail!("retrieval.max_scan_pages must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/rag.db\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.vector_store.backend, "memory");
        assert_eq!(config.retrieval.min_score, 0.7);
    }

    #[test]
    fn rejects_overlap_at_or_above_chunk_size() {
        let err = parse(
            "[db]\npath = \"/tmp/rag.db\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err =
            parse("[db]\npath = \"/tmp/rag.db\"\n[chunking]\nstrategy = \"recursive\"\n")
                .unwrap_err();
        assert!(err.to_string().contains("chunking strategy"));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err =
            parse("[db]\npath = \"/tmp/rag.db\"\n[vector_store]\nbackend = \"pinecone\"\n")
                .unwrap_err();
        assert!(err.to_string().contains("backend"));
    }
}
