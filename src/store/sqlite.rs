//! SQLite-backed [`VectorStore`].
//!
//! Layout:
//! - `kb_collections`: one registry row per collection (knowledge-base
//!   identity, counts, timestamps, schema version, embedding model).
//! - one table per collection, named after the collection, holding chunk
//!   records with their embedding as a little-endian f32 BLOB.
//!
//! Vector queries load the matching rows and rank them in Rust by cosine
//! distance. Upserts run in one transaction per call.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use super::{rank_candidates, Candidate, ChunkFilter, Lookup, StoredChunk, VectorStore, SCHEMA_VERSION};
use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::StoreError;
use crate::models::{Chunk, ChunkKind, DocumentType, KnowledgeBaseMeta};
use crate::{db, migrate};

/// Chunk columns in insert order, excluding `embedding`.
const CHUNK_COLUMNS: &[&str] = &[
    "id",
    "kb_name",
    "file_path",
    "relative_path",
    "chunk_index",
    "content",
    "content_hash",
    "chunk_kind",
    "heading_path",
    "start_line",
    "end_line",
    "start_offset",
    "end_offset",
    "token_estimate",
    "has_context",
    "ingestion_timestamp",
    "document_type",
    "language",
    "is_test",
];

const META_COLUMNS: &str = "collection, name, root_path, file_count, chunk_count, created_at, \
     last_ingested_at, schema_version, embedding_model, dims";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

enum Param {
    Text(String),
    Int(i64),
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Validate `collection` as a table name and check it is registered.
    async fn require(&self, collection: &str) -> Result<()> {
        table_ident(collection)?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_collections WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if n == 0 {
            return Err(StoreError::not_found(collection).into());
        }
        Ok(())
    }

    async fn select_chunks(&self, collection: &str, filter: &ChunkFilter) -> Result<Vec<SqliteRow>> {
        self.require(collection).await?;
        let (clause, params) = filter_sql(filter);
        let sql = format!(
            "SELECT {}, embedding FROM {} {} ORDER BY rowid",
            CHUNK_COLUMNS.join(", "),
            collection,
            clause
        );
        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(rows)
    }
}

/// Collection names double as table names, so only `kb_[a-z0-9_]+` is accepted.
fn table_ident(collection: &str) -> Result<&str, StoreError> {
    let valid = collection.starts_with("kb_")
        && collection
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(collection)
    } else {
        Err(StoreError::Invalid(format!(
            "invalid collection name: {}",
            collection
        )))
    }
}

fn filter_sql(filter: &ChunkFilter) -> (String, Vec<Param>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(p) = &filter.file_path {
        clauses.push("file_path = ?");
        params.push(Param::Text(p.clone()));
    }
    if let Some(ts) = filter.ingestion_timestamp {
        clauses.push("ingestion_timestamp = ?");
        params.push(Param::Int(ts));
    }
    if let Some(ts) = filter.before_timestamp {
        clauses.push("ingestion_timestamp < ?");
        params.push(Param::Int(ts));
    }
    if let Some(t) = filter.document_type {
        clauses.push("document_type = ?");
        params.push(Param::Text(t.as_str().to_string()));
    }
    if let Some(lang) = &filter.language {
        clauses.push("language = ?");
        params.push(Param::Text(lang.clone()));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[Param]) -> SqliteQuery<'q> {
    for p in params {
        query = match p {
            Param::Text(s) => query.bind(s.clone()),
            Param::Int(i) => query.bind(*i),
        };
    }
    query
}

fn corrupt(collection: &str, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        collection: collection.to_string(),
        message: message.into(),
    }
}

fn row_to_chunk(row: &SqliteRow, collection: &str) -> Result<Chunk> {
    let kind: String = row.try_get("chunk_kind")?;
    let doc_type: String = row.try_get("document_type")?;
    let heading_json: String = row.try_get("heading_path")?;
    let heading_path: Vec<String> = serde_json::from_str(&heading_json)
        .map_err(|e| corrupt(collection, format!("heading_path: {}", e)))?;

    Ok(Chunk {
        id: row.try_get("id")?,
        kb_name: row.try_get("kb_name")?,
        file_path: row.try_get("file_path")?,
        relative_path: row.try_get("relative_path")?,
        chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
        content: row.try_get("content")?,
        content_hash: row.try_get("content_hash")?,
        kind: ChunkKind::parse(&kind)
            .ok_or_else(|| corrupt(collection, format!("unknown chunk_kind '{}'", kind)))?,
        heading_path,
        start_line: row.try_get::<i64, _>("start_line")? as usize,
        end_line: row.try_get::<i64, _>("end_line")? as usize,
        start_offset: row.try_get::<i64, _>("start_offset")? as usize,
        end_offset: row.try_get::<i64, _>("end_offset")? as usize,
        token_estimate: row.try_get::<i64, _>("token_estimate")? as usize,
        has_context: row.try_get("has_context")?,
        ingestion_timestamp: row.try_get("ingestion_timestamp")?,
        document_type: DocumentType::parse(&doc_type)
            .ok_or_else(|| corrupt(collection, format!("unknown document_type '{}'", doc_type)))?,
        language: row.try_get("language")?,
        is_test: row.try_get("is_test")?,
    })
}

fn row_to_meta(row: &SqliteRow) -> Result<KnowledgeBaseMeta> {
    Ok(KnowledgeBaseMeta {
        collection: row.try_get("collection")?,
        name: row.try_get("name")?,
        root_path: row.try_get("root_path")?,
        file_count: row.try_get::<i64, _>("file_count")? as usize,
        chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
        created_at: row.try_get("created_at")?,
        last_ingested_at: row.try_get("last_ingested_at")?,
        schema_version: row.try_get::<i64, _>("schema_version")? as u32,
        embedding_model: row.try_get("embedding_model")?,
        dims: row.try_get::<i64, _>("dims")? as usize,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(&self, meta: &KnowledgeBaseMeta) -> Result<()> {
        let table = table_ident(&meta.collection)?;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                kb_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                chunk_kind TEXT NOT NULL,
                heading_path TEXT NOT NULL DEFAULT '[]',
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                token_estimate INTEGER NOT NULL,
                has_context INTEGER NOT NULL,
                ingestion_timestamp INTEGER NOT NULL,
                document_type TEXT NOT NULL,
                language TEXT,
                is_test INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#
        ))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_ts ON {table}(ingestion_timestamp)"
        ))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_file ON {table}(file_path)"
        ))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(&format!(
            "INSERT INTO kb_collections ({META_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(collection) DO NOTHING"
        ))
        .bind(&meta.collection)
        .bind(&meta.name)
        .bind(&meta.root_path)
        .bind(meta.file_count as i64)
        .bind(meta.chunk_count as i64)
        .bind(meta.created_at)
        .bind(meta.last_ingested_at)
        .bind(meta.schema_version as i64)
        .bind(&meta.embedding_model)
        .bind(meta.dims as i64)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(StoreError::Invalid(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }
        self.require(collection).await?;

        let placeholders = vec!["?"; CHUNK_COLUMNS.len() + 1].join(", ");
        let updates = CHUNK_COLUMNS
            .iter()
            .skip(1)
            .chain(std::iter::once(&"embedding"))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}, embedding) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            collection,
            CHUNK_COLUMNS.join(", "),
            placeholders,
            updates
        );

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let heading_path = serde_json::to_string(&chunk.heading_path)?;
            sqlx::query(&sql)
                .bind(&chunk.id)
                .bind(&chunk.kb_name)
                .bind(&chunk.file_path)
                .bind(&chunk.relative_path)
                .bind(chunk.chunk_index as i64)
                .bind(&chunk.content)
                .bind(&chunk.content_hash)
                .bind(chunk.kind.as_str())
                .bind(heading_path)
                .bind(chunk.start_line as i64)
                .bind(chunk.end_line as i64)
                .bind(chunk.start_offset as i64)
                .bind(chunk.end_offset as i64)
                .bind(chunk.token_estimate as i64)
                .bind(chunk.has_context)
                .bind(chunk.ingestion_timestamp)
                .bind(chunk.document_type.as_str())
                .bind(&chunk.language)
                .bind(chunk.is_test)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn query_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Candidate>> {
        let rows = self.select_chunks(collection, filter).await?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            candidates.push(Candidate {
                chunk: row_to_chunk(row, collection)?,
                distance: cosine_distance(vector, &blob_to_vec(&blob)),
            });
        }
        Ok(rank_candidates(candidates, k))
    }

    async fn get_all(&self, collection: &str, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        self.select_chunks(collection, filter)
            .await?
            .iter()
            .map(|row| row_to_chunk(row, collection))
            .collect()
    }

    async fn get_all_with_vectors(
        &self,
        collection: &str,
        filter: &ChunkFilter,
    ) -> Result<Vec<StoredChunk>> {
        let rows = self.select_chunks(collection, filter).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            out.push(StoredChunk {
                chunk: row_to_chunk(row, collection)?,
                vector: blob_to_vec(&blob),
            });
        }
        Ok(out)
    }

    async fn delete_by_filter(&self, collection: &str, filter: &ChunkFilter) -> Result<usize> {
        self.require(collection).await?;
        let (clause, params) = filter_sql(filter);
        let sql = format!("DELETE FROM {} {}", collection, clause);
        let result = bind_all(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected() as usize)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.require(collection).await?;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", collection))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        sqlx::query("DELETE FROM kb_collections WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<KnowledgeBaseMeta>> {
        let rows = sqlx::query(&format!(
            "SELECT {META_COLUMNS} FROM kb_collections WHERE schema_version = ? ORDER BY name"
        ))
        .bind(SCHEMA_VERSION as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        rows.iter().map(row_to_meta).collect()
    }

    async fn get_collection(&self, collection: &str) -> Result<Lookup<KnowledgeBaseMeta>> {
        let row = sqlx::query(&format!(
            "SELECT {META_COLUMNS} FROM kb_collections WHERE collection = ? AND schema_version = ?"
        ))
        .bind(collection)
        .bind(SCHEMA_VERSION as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(match row {
            Some(r) => Lookup::Found(row_to_meta(&r)?),
            None => Lookup::NotFound,
        })
    }

    async fn update_metadata(&self, meta: &KnowledgeBaseMeta) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE kb_collections SET
                name = ?, root_path = ?, file_count = ?, chunk_count = ?,
                created_at = ?, last_ingested_at = ?, schema_version = ?,
                embedding_model = ?, dims = ?
            WHERE collection = ?
            "#,
        )
        .bind(&meta.name)
        .bind(&meta.root_path)
        .bind(meta.file_count as i64)
        .bind(meta.chunk_count as i64)
        .bind(meta.created_at)
        .bind(meta.last_ingested_at)
        .bind(meta.schema_version as i64)
        .bind(&meta.embedding_model)
        .bind(meta.dims as i64)
        .bind(&meta.collection)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(&meta.collection).into());
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &ChunkFilter) -> Result<usize> {
        self.require(collection).await?;
        let (clause, params) = filter_sql(filter);
        let sql = format!("SELECT COUNT(*) AS n FROM {} {}", collection, clause);
        let row = bind_all(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }
}
