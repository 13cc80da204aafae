//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: extraction → chunking → embedding → vector
//! storage, with the source row in SQLite tracking lifecycle status.
//! Every status change goes through the transition table; a failure at
//! any stage lands the source in `failed` with the error stored verbatim.
//!
//! Ordering matters around the swap: embedding runs *before* the old
//! vectors are deleted, so an embedding failure never leaves a source
//! with no searchable chunks. A storage failure still fails the source,
//! but when the store is unreachable the freshly embedded vectors are
//! first parked in the relational fallback table; `migrate-vectors`
//! later moves them and completes the source without re-embedding.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::chunk::{chunk, ChunkOptions};
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::StoreError;
use crate::extract;
use crate::migrate::vector_to_blob;
use crate::models::{
    FaqItem, KnowledgeSource, SourceOrigin, SourceStatus, TextChunk, VectorPayload, VectorRecord,
};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::store::{Filter, VectorStore};

/// Outcome of one ingest run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source_id: String,
    pub chunk_count: usize,
    pub token_count: usize,
    pub elapsed_ms: u64,
    /// Name of the store backend that received the vectors.
    pub backend: String,
}

/// Caller-supplied knobs for a single ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub title: Option<String>,
    pub category: Option<String>,
    /// Re-ingest an existing source instead of registering a new one.
    pub source_id: Option<String>,
    /// Chunking preset name; falls back to the configured strategy.
    pub preset: Option<String>,
}

pub struct IngestionPipeline {
    pool: SqlitePool,
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingClient,
    config: Config,
}

impl IngestionPipeline {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingClient,
        config: Config,
    ) -> Self {
        Self {
            pool,
            store,
            embedder,
            config,
        }
    }

    pub async fn process_file(
        &self,
        tenant_id: &str,
        bytes: &[u8],
        declared_type: Option<&str>,
        filename: Option<&str>,
        options: &IngestOptions,
        reporter: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let source = self
            .register_source(tenant_id, SourceOrigin::File, options, filename)
            .await?;
        let extracted = match extract::extract(
            bytes,
            declared_type,
            filename,
            self.config.chunking.max_content_length,
        ) {
            Ok(e) => e,
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                return Err(e.into());
            }
        };
        reporter.report(IngestProgressEvent::Extracting {
            source_id: source.id.clone(),
            format: extracted.format.as_str().to_string(),
        });
        if options.title.is_none() {
            if let Some(title) = &extracted.title {
                self.update_title(&source.id, title).await?;
            }
        }
        self.process_content(&source, &extracted.content, options, reporter)
            .await
    }

    pub async fn process_url(
        &self,
        tenant_id: &str,
        url: &str,
        options: &IngestOptions,
        reporter: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let source = self
            .register_source(tenant_id, SourceOrigin::Url, options, Some(url))
            .await?;
        let fetched = self.fetch_url(url).await;
        let (bytes, content_type) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                return Err(e);
            }
        };
        let filename = url.rsplit('/').next().filter(|s| !s.is_empty());
        let extracted = match extract::extract(
            &bytes,
            content_type.as_deref(),
            filename,
            self.config.chunking.max_content_length,
        ) {
            Ok(e) => e,
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                return Err(e.into());
            }
        };
        reporter.report(IngestProgressEvent::Extracting {
            source_id: source.id.clone(),
            format: extracted.format.as_str().to_string(),
        });
        if options.title.is_none() {
            if let Some(title) = &extracted.title {
                self.update_title(&source.id, title).await?;
            }
        }
        self.process_content(&source, &extracted.content, options, reporter)
            .await
    }

    pub async fn process_text(
        &self,
        tenant_id: &str,
        text: &str,
        options: &IngestOptions,
        reporter: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let source = self
            .register_source(tenant_id, SourceOrigin::Text, options, None)
            .await?;
        let extracted = match extract::extract(
            text.as_bytes(),
            Some("text/plain"),
            None,
            self.config.chunking.max_content_length,
        ) {
            Ok(e) => e,
            Err(e) => {
                self.mark_failed(&source.id, &e.to_string()).await?;
                return Err(e.into());
            }
        };
        self.process_content(&source, &extracted.content, options, reporter)
            .await
    }

    async fn fetch_url(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let resp = reqwest::get(url)
            .await
            .with_context(|| format!("fetching {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("fetching {}: HTTP {}", url, resp.status());
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }

    /// Chunk, embed, and swap in the new vector set for a source.
    async fn process_content(
        &self,
        source: &KnowledgeSource,
        content: &str,
        options: &IngestOptions,
        reporter: &dyn IngestProgressReporter,
    ) -> Result<IngestReport> {
        let started = Instant::now();

        let chunk_options = match options.preset.as_deref() {
            Some(name) => match ChunkOptions::preset(name) {
                Some(o) => o,
                None => {
                    let message = format!("unknown chunking preset: {}", name);
                    self.mark_failed(&source.id, &message).await?;
                    return Err(anyhow::anyhow!(message));
                }
            },
            None => ChunkOptions::from_config(&self.config.chunking),
        };
        let chunks = chunk(content, &chunk_options);
        reporter.report(IngestProgressEvent::Chunked {
            source_id: source.id.clone(),
            chunks: chunks.len() as u64,
        });
        if chunks.is_empty() {
            self.mark_failed(&source.id, "no chunks produced from content")
                .await?;
            anyhow::bail!("no chunks produced from content");
        }

        // Embed everything before touching the stored set, so an embedding
        // failure cannot leave the source without searchable vectors.
        let batch_size = self.config.embedding.batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size) as u64;
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = match self.embedder.embed_batch(&texts).await {
                Ok(b) => b,
                Err(e) => {
                    self.mark_failed(&source.id, &e.to_string()).await?;
                    return Err(e.into());
                }
            };
            vectors.extend(embedded.vectors);
            reporter.report(IngestProgressEvent::Embedding {
                source_id: source.id.clone(),
                n: (i + 1) as u64,
                total: total_batches,
            });
        }

        let records = self.build_records(source, &chunks, vectors);
        let token_count: usize = chunks.iter().map(|c| c.token_estimate).sum();
        reporter.report(IngestProgressEvent::Storing {
            source_id: source.id.clone(),
            vectors: records.len() as u64,
        });

        if let Err(e) = self.swap_vectors(source, records).await {
            self.mark_failed(&source.id, &e.to_string()).await?;
            return Err(e.into());
        }

        self.mark_indexed(&source.id, chunks.len(), token_count)
            .await?;

        Ok(IngestReport {
            source_id: source.id.clone(),
            chunk_count: chunks.len(),
            token_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            backend: self.store.backend_name().to_string(),
        })
    }

    fn build_records(
        &self,
        source: &KnowledgeSource,
        chunks: &[TextChunk],
        vectors: Vec<Vec<f32>>,
    ) -> Vec<VectorRecord> {
        chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                payload: VectorPayload {
                    tenant_id: source.tenant_id.clone(),
                    source_id: source.id.clone(),
                    category: source.category.clone(),
                    content: chunk.content.clone(),
                    chunk_index: chunk.index,
                    token_count: chunk.token_estimate,
                    metadata: chunk.metadata.clone(),
                },
            })
            .collect()
    }

    /// Delete the source's old vectors and upsert the new set. A store
    /// error always propagates so the caller marks the source failed.
    /// When the store is unreachable the freshly embedded vectors are
    /// first parked in the fallback table, so `migrate-vectors` can
    /// finish the job later without re-embedding.
    async fn swap_vectors(
        &self,
        source: &KnowledgeSource,
        records: Vec<VectorRecord>,
    ) -> Result<(), StoreError> {
        let collection = &self.config.vector_store.chunk_collection;
        let filter = Filter::tenant(&source.tenant_id).with_source(&source.id);
        let swap = async {
            self.store.delete_by_filter(collection, &filter).await?;
            self.store.upsert(collection, records.clone()).await
        };
        match swap.await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Only unreachability is worth parking for; a store-side
                // rejection would fail again at migration time too.
                if matches!(e, StoreError::Request(_)) {
                    warn!(
                        source_id = %source.id,
                        error = %e,
                        "vector store unreachable, parking embedded vectors in fallback table"
                    );
                    if let Err(db_err) = self.park_in_fallback(collection, &records).await {
                        warn!(
                            source_id = %source.id,
                            error = %db_err,
                            "failed to park vectors in fallback table"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn park_in_fallback(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        for record in records {
            let payload_json = serde_json::to_string(&record.payload)?;
            sqlx::query(
                "INSERT OR REPLACE INTO fallback_chunks (id, collection, payload_json, vector)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(collection)
            .bind(&payload_json)
            .bind(vector_to_blob(&record.vector))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Insert a new source row, or refresh an existing one for
    /// re-ingestion. Either way the row leaves here in `processing`.
    async fn register_source(
        &self,
        tenant_id: &str,
        origin: SourceOrigin,
        options: &IngestOptions,
        default_title: Option<&str>,
    ) -> Result<KnowledgeSource> {
        let now = Utc::now().timestamp();
        let source = match &options.source_id {
            Some(id) => {
                let existing = self
                    .load_source(tenant_id, id)
                    .await?
                    .with_context(|| format!("unknown source: {}", id))?;
                let status = existing.status.transition(SourceStatus::Processing)?;
                sqlx::query("UPDATE sources SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                KnowledgeSource {
                    status,
                    ..existing
                }
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let title = options
                    .title
                    .clone()
                    .or_else(|| default_title.map(|s| s.to_string()));
                sqlx::query(
                    "INSERT INTO sources
                     (id, tenant_id, origin, title, category, status, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
                )
                .bind(&id)
                .bind(tenant_id)
                .bind(origin.as_str())
                .bind(&title)
                .bind(&options.category)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                let status = SourceStatus::Pending.transition(SourceStatus::Processing)?;
                sqlx::query("UPDATE sources SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(&id)
                    .execute(&self.pool)
                    .await?;
                KnowledgeSource {
                    id,
                    tenant_id: tenant_id.to_string(),
                    origin,
                    title,
                    category: options.category.clone(),
                    status,
                    chunk_count: 0,
                    token_count: 0,
                    last_processed_at: None,
                    last_error: None,
                    deleted: false,
                }
            }
        };
        Ok(source)
    }

    pub async fn load_source(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<KnowledgeSource>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, origin, title, category, status, chunk_count, token_count,
                    last_processed_at, last_error, deleted
             FROM sources WHERE id = ? AND tenant_id = ?",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(source_from_row).transpose()
    }

    async fn update_title(&self, source_id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE sources SET title = ? WHERE id = ?")
            .bind(title)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_indexed(
        &self,
        source_id: &str,
        chunk_count: usize,
        token_count: usize,
    ) -> Result<()> {
        let status = SourceStatus::Processing.transition(SourceStatus::Indexed)?;
        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE sources
             SET status = ?, chunk_count = ?, token_count = ?, last_processed_at = ?,
                 last_error = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(chunk_count as i64)
        .bind(token_count as i64)
        .bind(now)
        .bind(now)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, source_id: &str, message: &str) -> Result<()> {
        let status = SourceStatus::Processing.transition(SourceStatus::Failed)?;
        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE sources SET status = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(message)
        .bind(now)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-delete a source: vectors removed, row kept with the flag set.
    pub async fn delete_source(&self, tenant_id: &str, source_id: &str) -> Result<()> {
        let filter = Filter::tenant(tenant_id).with_source(source_id);
        self.store
            .delete_by_filter(&self.config.vector_store.chunk_collection, &filter)
            .await?;
        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE sources SET deleted = 1, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(now)
        .bind(source_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update an FAQ, re-embedding its question+answer text.
    /// The vector record is keyed by the FAQ id, so an update replaces
    /// the old point in place.
    pub async fn upsert_faq(
        &self,
        tenant_id: &str,
        id: Option<&str>,
        question: &str,
        answer: &str,
        category: Option<&str>,
    ) -> Result<FaqItem> {
        let faq = FaqItem {
            id: id
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            tenant_id: tenant_id.to_string(),
            // Questions are kept single-line so the payload content stays
            // splittable back into question and answer.
            question: question.split_whitespace().collect::<Vec<_>>().join(" "),
            answer: answer.to_string(),
            category: category.map(|s| s.to_string()),
            updated_at: Utc::now(),
        };

        let text = faq.embedding_text();
        let vector = self.embedder.embed(&text).await?;
        let record = VectorRecord {
            id: faq.id.clone(),
            vector,
            payload: VectorPayload {
                tenant_id: faq.tenant_id.clone(),
                source_id: faq.id.clone(),
                category: faq.category.clone(),
                content: text,
                chunk_index: 0,
                token_count: crate::models::estimate_tokens(&faq.embedding_text()),
                metadata: crate::models::ChunkMetadata::Fixed,
            },
        };
        self.store
            .upsert(&self.config.vector_store.faq_collection, vec![record])
            .await?;

        sqlx::query(
            "INSERT OR REPLACE INTO faqs (id, tenant_id, question, answer, category, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&faq.id)
        .bind(&faq.tenant_id)
        .bind(&faq.question)
        .bind(&faq.answer)
        .bind(&faq.category)
        .bind(faq.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(faq)
    }

    pub async fn delete_faq(&self, tenant_id: &str, faq_id: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM faqs WHERE id = ? AND tenant_id = ?")
            .bind(faq_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            anyhow::bail!("unknown faq: {}", faq_id);
        }
        self.store
            .delete_by_ids(
                &self.config.vector_store.faq_collection,
                &[faq_id.to_string()],
            )
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }
}

pub(crate) fn source_from_row(row: sqlx::sqlite::SqliteRow) -> Result<KnowledgeSource> {
    let status_str: String = row.get("status");
    let origin_str: String = row.get("origin");
    let last_processed: Option<i64> = row.get("last_processed_at");
    Ok(KnowledgeSource {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        origin: SourceOrigin::parse(&origin_str)
            .with_context(|| format!("unknown source origin: {}", origin_str))?,
        title: row.get("title"),
        category: row.get("category"),
        status: SourceStatus::parse(&status_str)
            .with_context(|| format!("unknown source status: {}", status_str))?,
        chunk_count: row.get("chunk_count"),
        token_count: row.get("token_count"),
        last_processed_at: last_processed.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        last_error: row.get("last_error"),
        deleted: row.get::<i64, _>("deleted") != 0,
    })
}
