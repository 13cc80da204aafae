use anyhow::Result;
use sqlx::SqlitePool;

use crate::ingest::source_from_row;
use crate::models::KnowledgeSource;

/// All non-deleted sources for a tenant, newest first.
pub async fn list_sources(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<KnowledgeSource>> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, origin, title, category, status, chunk_count, token_count,
                last_processed_at, last_error, deleted
         FROM sources
         WHERE tenant_id = ? AND deleted = 0
         ORDER BY updated_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(source_from_row).collect()
}

pub fn print_sources(sources: &[KnowledgeSource]) {
    println!(
        "{:<38} {:<6} {:<12} {:>7} {:>8}  TITLE",
        "ID", "ORIGIN", "STATUS", "CHUNKS", "TOKENS"
    );
    for source in sources {
        println!(
            "{:<38} {:<6} {:<12} {:>7} {:>8}  {}",
            source.id,
            source.origin.as_str(),
            source.status.as_str(),
            source.chunk_count,
            source.token_count,
            source.title.as_deref().unwrap_or("-")
        );
        if let Some(error) = &source.last_error {
            println!("    last error: {}", error);
        }
    }
}
