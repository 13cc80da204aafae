//! Schema creation and the fallback-table vector migration.
//!
//! The fallback table holds vectors that were embedded while no vector
//! store backend was reachable; the owning sources sit in `failed`.
//! `migrate_vectors` moves the vectors into the store preserving ids,
//! so nothing is re-embedded, and marks the recovered sources indexed.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::models::{VectorPayload, VectorRecord};
use crate::store::VectorStore;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            origin TEXT NOT NULL,
            title TEXT,
            category TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            chunk_count INTEGER NOT NULL DEFAULT 0,
            token_count INTEGER NOT NULL DEFAULT 0,
            last_processed_at INTEGER,
            last_error TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS faqs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            category TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vectors written while the store backend was unreachable. Payload is
    // the full JSON payload; vector is little-endian f32 bytes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fallback_chunks (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_tenant ON sources(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_faqs_tenant ON faqs(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fallback_collection ON fallback_chunks(collection)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Move all fallback rows into the vector store, preserving ids. Rows are
/// deleted only after their collection's upsert succeeds, and sources
/// that failed when their vectors were parked come out of `failed` with
/// their counts restored. Returns the number of vectors moved.
pub async fn migrate_vectors(pool: &SqlitePool, store: &dyn VectorStore) -> Result<u64> {
    let rows = sqlx::query("SELECT id, collection, payload_json, vector FROM fallback_chunks")
        .fetch_all(pool)
        .await?;

    let mut by_collection: BTreeMap<String, Vec<VectorRecord>> = BTreeMap::new();
    for row in &rows {
        let id: String = row.get("id");
        let collection: String = row.get("collection");
        let payload_json: String = row.get("payload_json");
        let blob: Vec<u8> = row.get("vector");
        let payload: VectorPayload = serde_json::from_str(&payload_json)
            .with_context(|| format!("malformed fallback payload for {}", id))?;
        by_collection.entry(collection).or_default().push(VectorRecord {
            id,
            vector: blob_to_vector(&blob),
            payload,
        });
    }

    let mut moved = 0u64;
    for (collection, records) in by_collection {
        let count = records.len() as u64;
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut per_source: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for record in &records {
            let entry = per_source.entry(record.payload.source_id.clone()).or_default();
            entry.0 += 1;
            entry.1 += record.payload.token_count as i64;
        }
        store
            .upsert(&collection, records)
            .await
            .with_context(|| format!("migrating fallback vectors into '{}'", collection))?;
        for batch in ids.chunks(500) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!("DELETE FROM fallback_chunks WHERE id IN ({})", placeholders);
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            query.execute(pool).await?;
        }

        // Sources whose swap failed on an unreachable store are complete
        // again now that their full vector set landed. FAQ payloads carry
        // the faq id as source_id and match no sources row.
        let now = Utc::now().timestamp();
        for (source_id, (chunk_count, token_count)) in per_source {
            sqlx::query(
                "UPDATE sources
                 SET status = 'indexed', chunk_count = ?, token_count = ?,
                     last_processed_at = ?, last_error = NULL, updated_at = ?
                 WHERE id = ? AND status = 'failed'",
            )
            .bind(chunk_count)
            .bind(token_count)
            .bind(now)
            .bind(now)
            .bind(&source_id)
            .execute(pool)
            .await?;
        }

        info!(collection, count, "migrated fallback vectors");
        moved += count;
    }

    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let vector = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }

    #[test]
    fn blob_ignores_trailing_partial_word() {
        let mut blob = vector_to_blob(&[1.0]);
        blob.push(0xFF);
        assert_eq!(blob_to_vector(&blob), vec![1.0]);
    }
}
