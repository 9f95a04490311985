//! Idempotent schema setup for the collection registry.
//!
//! Per-collection chunk tables are created lazily by
//! [`SqliteStore::ensure_collection`](crate::store::sqlite::SqliteStore).

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_collections (
            collection TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL,
            file_count INTEGER NOT NULL DEFAULT 0,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_ingested_at INTEGER NOT NULL,
            schema_version INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_collections_name ON kb_collections(name)")
        .execute(pool)
        .await?;

    Ok(())
}
