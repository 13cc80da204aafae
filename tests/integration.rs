//! End-to-end pipeline tests: ingest through retrieval against the
//! in-memory store and the deterministic hash embedding provider, with a
//! temp-file SQLite database per test.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use ragline::config::{Config, DbConfig};
use ragline::db;
use ragline::embedding::EmbeddingClient;
use ragline::error::StoreError;
use ragline::ingest::{IngestOptions, IngestionPipeline};
use ragline::llm::LlmClient;
use ragline::migrate;
use ragline::models::{SourceStatus, VectorRecord};
use ragline::progress::NoProgress;
use ragline::retrieval::{RerankMode, RetrievalService, SearchOptions};
use ragline::sources;
use ragline::store::{
    Filter, MemoryStore, ScoredPoint, ScrollPage, StoredPoint, VectorStore,
};

fn test_config(db_path: &Path, provider: &str) -> Config {
    let mut config: Config = toml::from_str(&format!(
        "[db]\npath = \"{}\"\n",
        db_path.display()
    ))
    .unwrap();
    config.embedding.provider = provider.to_string();
    config
}

async fn setup(provider: &str) -> (tempfile::TempDir, Config, SqlitePool, Arc<MemoryStore>) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir.path().join("rag.db"), provider);
    let pool = db::connect(&config.db).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    (dir, config, pool, store)
}

fn pipeline(config: &Config, pool: &SqlitePool, store: Arc<MemoryStore>) -> IngestionPipeline {
    IngestionPipeline::new(
        pool.clone(),
        store,
        EmbeddingClient::new(&config.embedding).unwrap(),
        config.clone(),
    )
}

fn retrieval(config: &Config, store: Arc<MemoryStore>) -> RetrievalService {
    RetrievalService::new(
        store,
        EmbeddingClient::new(&config.embedding).unwrap(),
        LlmClient::new(&config.llm),
        config.clone(),
    )
}

/// Three paragraphs of roughly 600 characters each.
fn three_paragraph_document() -> String {
    let p1 = "The onboarding guide explains how new accounts are provisioned. ".repeat(9);
    let p2 = "Billing runs on the first business day of every calendar month. ".repeat(9);
    let p3 = "Support requests are answered within one business day at most. ".repeat(9);
    format!(
        "{}\n\n{}\n\n{}",
        p1.trim_end(),
        p2.trim_end(),
        p3.trim_end()
    )
}

#[tokio::test]
async fn ingest_text_end_to_end() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());

    let text = three_paragraph_document();
    assert!(text.len() > 1500 && text.len() < 2100);

    let report = pipeline
        .process_text(
            "acme",
            &text,
            &IngestOptions {
                preset: Some("qa".to_string()),
                ..Default::default()
            },
            &NoProgress,
        )
        .await
        .unwrap();

    assert!((2..=3).contains(&report.chunk_count));
    assert!(report.token_count > 0);
    assert_eq!(report.backend, "memory");

    let source = pipeline
        .load_source("acme", &report.source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.status, SourceStatus::Indexed);
    assert_eq!(source.chunk_count as usize, report.chunk_count);
    assert!(source.last_error.is_none());
    assert!(source.last_processed_at.is_some());

    let stored = store
        .count(
            "chunks",
            &Filter::tenant("acme").with_source(&report.source_id),
        )
        .await
        .unwrap();
    assert_eq!(stored as usize, report.chunk_count);
}

#[tokio::test]
async fn resubmission_replaces_vectors_without_duplication() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());

    let first = pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap();

    let shorter = "A single short paragraph that replaces the earlier document entirely. \
        It should produce fewer chunks than the original three paragraph text did."
        .to_string();
    let second = pipeline
        .process_text(
            "acme",
            &shorter,
            &IngestOptions {
                source_id: Some(first.source_id.clone()),
                ..Default::default()
            },
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(second.source_id, first.source_id);
    let stored = store
        .count(
            "chunks",
            &Filter::tenant("acme").with_source(&first.source_id),
        )
        .await
        .unwrap();
    assert_eq!(stored as usize, second.chunk_count);

    let source = pipeline
        .load_source("acme", &first.source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.status, SourceStatus::Indexed);
    assert_eq!(source.chunk_count as usize, second.chunk_count);
}

#[tokio::test]
async fn disabled_embedding_marks_source_failed() {
    let (_dir, config, pool, store) = setup("disabled").await;
    let pipeline = pipeline(&config, &pool, store);

    let err = pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disabled"));

    let listed = sources::list_sources(&pool, "acme").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SourceStatus::Failed);
    assert!(listed[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("disabled"));
}

#[tokio::test]
async fn query_returns_chunk_and_faq_separately() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());

    let doc = "How long do refunds take is a common question. Refunds take about thirty \
        days to reach the original payment method after the return is approved.";
    let report = pipeline
        .process_text("acme", doc, &Default::default(), &NoProgress)
        .await
        .unwrap();
    pipeline
        .upsert_faq(
            "acme",
            None,
            "How long do refunds take?",
            "About thirty days.",
            None,
        )
        .await
        .unwrap();

    let service = retrieval(&config, store);
    let result = service
        .search(
            "how long do refunds take",
            "acme",
            &SearchOptions {
                min_score: Some(0.3),
                include_faqs: true,
                rerank: RerankMode::Off,
                ..Default::default()
            },
        )
        .await;

    assert!(!result.chunks.is_empty());
    assert_eq!(result.chunks[0].source_id, report.source_id);
    assert_eq!(result.faqs.len(), 1);
    assert_eq!(result.faqs[0].question, "How long do refunds take?");
    assert_eq!(result.faqs[0].answer, "About thirty days.");
    assert!(result.context.contains("Q: How long do refunds take?"));
    assert!(result.context.contains("(source"));
}

#[tokio::test]
async fn retrieval_is_idempotent() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());
    pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap();

    let service = retrieval(&config, store);
    let options = SearchOptions {
        min_score: Some(0.1),
        rerank: RerankMode::Keyword,
        ..Default::default()
    };
    let first = service.search("billing calendar month", "acme", &options).await;
    let second = service.search("billing calendar month", "acme", &options).await;

    let ids = |r: &ragline::models::RagContext| {
        r.chunks
            .iter()
            .map(|c| (c.id.clone(), c.score))
            .collect::<Vec<_>>()
    };
    assert!(!first.chunks.is_empty());
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.context, second.context);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());
    pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap();

    let service = retrieval(&config, store);
    let result = service
        .search(
            "billing calendar month",
            "globex",
            &SearchOptions {
                min_score: Some(0.0),
                ..Default::default()
            },
        )
        .await;
    assert!(result.chunks.is_empty());
    assert!(result.faqs.is_empty());
    assert!(result.context.is_empty());
}

#[tokio::test]
async fn deleted_source_disappears_from_search_and_listing() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());
    let report = pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap();

    pipeline.delete_source("acme", &report.source_id).await.unwrap();

    let stored = store
        .count(
            "chunks",
            &Filter::tenant("acme").with_source(&report.source_id),
        )
        .await
        .unwrap();
    assert_eq!(stored, 0);
    assert!(sources::list_sources(&pool, "acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn faq_update_replaces_vector_in_place() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store.clone());

    let faq = pipeline
        .upsert_faq("acme", None, "What is the refund window?", "Thirty days.", None)
        .await
        .unwrap();
    pipeline
        .upsert_faq(
            "acme",
            Some(&faq.id),
            "What is the refund window?",
            "Sixty days for annual plans.",
            None,
        )
        .await
        .unwrap();

    assert_eq!(store.count("faqs", &Filter::tenant("acme")).await.unwrap(), 1);

    let service = retrieval(&config, store.clone());
    let result = service
        .search(
            "refund window",
            "acme",
            &SearchOptions {
                min_score: Some(0.1),
                include_faqs: true,
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.faqs.len(), 1);
    assert_eq!(result.faqs[0].answer, "Sixty days for annual plans.");

    pipeline.delete_faq("acme", &faq.id).await.unwrap();
    assert_eq!(store.count("faqs", &Filter::tenant("acme")).await.unwrap(), 0);
}

/// A store whose every call fails with the given error, simulating an
/// unreachable or misbehaving backend.
struct FailingStore(fn() -> StoreError);

fn unreachable() -> StoreError {
    StoreError::Request("store down".into())
}

fn server_error() -> StoreError {
    StoreError::Backend {
        status: 500,
        body: "internal error".into(),
    }
}

#[async_trait]
impl VectorStore for FailingStore {
    async fn ensure_collection(&self, _: &str, _: usize) -> Result<(), StoreError> {
        Err((self.0)())
    }
    async fn upsert(&self, _: &str, _: Vec<VectorRecord>) -> Result<(), StoreError> {
        Err((self.0)())
    }
    async fn search(
        &self,
        _: &str,
        _: &[f32],
        _: usize,
        _: &Filter,
        _: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        Err((self.0)())
    }
    async fn get_by_ids(&self, _: &str, _: &[String]) -> Result<Vec<StoredPoint>, StoreError> {
        Err((self.0)())
    }
    async fn delete_by_ids(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
        Err((self.0)())
    }
    async fn delete_by_filter(&self, _: &str, _: &Filter) -> Result<(), StoreError> {
        Err((self.0)())
    }
    async fn count(&self, _: &str, _: &Filter) -> Result<u64, StoreError> {
        Err((self.0)())
    }
    async fn scroll(
        &self,
        _: &str,
        _: &Filter,
        _: usize,
        _: Option<String>,
    ) -> Result<ScrollPage, StoreError> {
        Err((self.0)())
    }
    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn unreachable_store_fails_source_and_parks_vectors() {
    let (_dir, config, pool, memory) = setup("hash").await;
    let pipeline = IngestionPipeline::new(
        pool.clone(),
        Arc::new(FailingStore(unreachable)),
        EmbeddingClient::new(&config.embedding).unwrap(),
        config.clone(),
    );

    let err = pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("store down"));

    // The storage failure is loud: the source reads failed, with the
    // store error recorded, until the vectors actually land somewhere.
    let listed = sources::list_sources(&pool, "acme").await.unwrap();
    assert_eq!(listed.len(), 1);
    let source_id = listed[0].id.clone();
    assert_eq!(listed[0].status, SourceStatus::Failed);
    assert!(listed[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("store down"));

    let parked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fallback_chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(parked > 0);

    // migrate-vectors moves the parked embeddings into a reachable store
    // and completes the source without re-embedding.
    let moved = migrate::migrate_vectors(&pool, memory.as_ref()).await.unwrap();
    assert_eq!(moved, parked as u64);
    let stored = memory
        .count("chunks", &Filter::tenant("acme").with_source(&source_id))
        .await
        .unwrap();
    assert_eq!(stored, parked as u64);

    let recovered = sources::list_sources(&pool, "acme").await.unwrap();
    assert_eq!(recovered[0].status, SourceStatus::Indexed);
    assert!(recovered[0].last_error.is_none());
    assert_eq!(recovered[0].chunk_count as u64, parked as u64);

    // A second migration run finds nothing left to move.
    assert_eq!(migrate::migrate_vectors(&pool, memory.as_ref()).await.unwrap(), 0);
}

#[tokio::test]
async fn store_rejection_fails_source_without_parking() {
    let (_dir, config, pool, _memory) = setup("hash").await;
    let pipeline = IngestionPipeline::new(
        pool.clone(),
        Arc::new(FailingStore(server_error)),
        EmbeddingClient::new(&config.embedding).unwrap(),
        config.clone(),
    );

    let err = pipeline
        .process_text("acme", &three_paragraph_document(), &Default::default(), &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("500"));

    let listed = sources::list_sources(&pool, "acme").await.unwrap();
    assert_eq!(listed[0].status, SourceStatus::Failed);

    // A store-side rejection would fail again at migration time, so
    // nothing is parked for it.
    let parked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fallback_chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(parked, 0);
}

#[tokio::test]
async fn unknown_preset_marks_source_failed() {
    let (_dir, config, pool, store) = setup("hash").await;
    let pipeline = pipeline(&config, &pool, store);

    let err = pipeline
        .process_text(
            "acme",
            "Some perfectly ordinary text to ingest.",
            &IngestOptions {
                preset: Some("coarse".to_string()),
                ..Default::default()
            },
            &NoProgress,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("preset"));

    let listed = sources::list_sources(&pool, "acme").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SourceStatus::Failed);
    assert!(listed[0].last_error.as_deref().unwrap().contains("coarse"));
}

#[tokio::test]
async fn store_outage_during_search_yields_empty_results() {
    let (_dir, config, _pool, _memory) = setup("hash").await;
    let service = RetrievalService::new(
        Arc::new(FailingStore(unreachable)),
        EmbeddingClient::new(&config.embedding).unwrap(),
        LlmClient::new(&config.llm),
        config.clone(),
    );
    let result = service
        .search("anything", "acme", &SearchOptions::default())
        .await;
    assert!(result.chunks.is_empty());
    assert!(result.faqs.is_empty());
}
