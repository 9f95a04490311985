//! Vector store abstraction.
//!
//! Every knowledge base lives in exactly one collection, named
//! deterministically from the knowledge-base name and [`SCHEMA_VERSION`]
//! (see [`collection_name`]). Collections written under another schema
//! version are never listed, so a format change cannot silently mix old and
//! new records.
//!
//! The metric is cosine: candidates carry `distance = (1 - cos) / 2`, which
//! lies in `[0, 1]`, and `similarity = 1 - distance`.
//!
//! Two backends implement [`VectorStore`]:
//! - [`sqlite::SqliteStore`]: a registry table plus one table per collection.
//! - [`memory::InMemoryStore`]: same semantics, for tests.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Chunk, DocumentType, KnowledgeBaseMeta};

/// Bumped whenever the persisted chunk layout changes.
pub const SCHEMA_VERSION: u32 = 2;

/// Reduce a knowledge-base name to `[a-z0-9_]`: lowercase, every run of
/// other characters becomes one `_`, leading/trailing `_` trimmed.
/// An empty result becomes `"default"`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `kb_<sanitized>_v<SCHEMA_VERSION>`.
pub fn collection_name(kb_name: &str) -> String {
    format!("kb_{}_v{}", sanitize_name(kb_name), SCHEMA_VERSION)
}

/// Result of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(t) => Some(t),
            Lookup::NotFound => None,
        }
    }

    /// Convert to a [`StoreError::NotFound`] naming `name`.
    pub fn or_not_found(self, name: &str) -> Result<T, StoreError> {
        match self {
            Lookup::Found(t) => Ok(t),
            Lookup::NotFound => Err(StoreError::not_found(name)),
        }
    }
}

/// Metadata filter. All set fields must match; an empty filter matches
/// everything. `before_timestamp` is a strict `<`, the rest are equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub file_path: Option<String>,
    pub ingestion_timestamp: Option<i64>,
    pub before_timestamp: Option<i64>,
    pub document_type: Option<DocumentType>,
    pub language: Option<String>,
}

impl ChunkFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ingestion_timestamp(ts: i64) -> Self {
        Self {
            ingestion_timestamp: Some(ts),
            ..Self::default()
        }
    }

    pub fn before(ts: i64) -> Self {
        Self {
            before_timestamp: Some(ts),
            ..Self::default()
        }
    }

    pub fn language(language: Option<String>) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(p) = &self.file_path {
            if &chunk.file_path != p {
                return false;
            }
        }
        if let Some(ts) = self.ingestion_timestamp {
            if chunk.ingestion_timestamp != ts {
                return false;
            }
        }
        if let Some(ts) = self.before_timestamp {
            if chunk.ingestion_timestamp >= ts {
                return false;
            }
        }
        if let Some(t) = self.document_type {
            if chunk.document_type != t {
                return false;
            }
        }
        if let Some(lang) = &self.language {
            if chunk.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A chunk together with its embedding, as exported for a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A query hit with its cosine distance in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub distance: f64,
}

impl Candidate {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }
}

/// Sort by ascending distance keeping row order for ties, then keep `k`.
pub(crate) fn rank_candidates(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(k);
    candidates
}

/// Collection-oriented vector store.
///
/// All `collection` arguments are names produced by [`collection_name`].
/// Operations on a collection that does not exist fail with
/// [`StoreError::NotFound`], except [`get_collection`](Self::get_collection)
/// which reports [`Lookup::NotFound`].
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create collection + registry entry if missing |
/// | [`upsert`](VectorStore::upsert) | Insert or replace chunks by id, one transaction |
/// | [`query_by_vector`](VectorStore::query_by_vector) | Top-`k` by cosine distance |
/// | [`get_all`](VectorStore::get_all) | Chunk records matching a filter |
/// | [`get_all_with_vectors`](VectorStore::get_all_with_vectors) | Same, with embeddings |
/// | [`delete_by_filter`](VectorStore::delete_by_filter) | Remove matching chunks |
/// | [`drop_collection`](VectorStore::drop_collection) | Remove collection and registry entry |
/// | [`list_collections`](VectorStore::list_collections) | Registry entries of the current schema |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection described by `meta` if it does not exist.
    /// An existing collection keeps its metadata.
    async fn ensure_collection(&self, meta: &KnowledgeBaseMeta) -> Result<()>;

    /// `vectors[i]` belongs to `chunks[i]`.
    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    async fn query_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Candidate>>;

    /// Matching chunks in insertion order.
    async fn get_all(&self, collection: &str, filter: &ChunkFilter) -> Result<Vec<Chunk>>;

    async fn get_all_with_vectors(
        &self,
        collection: &str,
        filter: &ChunkFilter,
    ) -> Result<Vec<StoredChunk>>;

    /// Returns the number of chunks removed.
    async fn delete_by_filter(&self, collection: &str, filter: &ChunkFilter) -> Result<usize>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Current-schema collections, ordered by knowledge-base name.
    async fn list_collections(&self) -> Result<Vec<KnowledgeBaseMeta>>;

    async fn get_collection(&self, collection: &str) -> Result<Lookup<KnowledgeBaseMeta>>;

    /// Overwrite the registry entry for `meta.collection`.
    async fn update_metadata(&self, meta: &KnowledgeBaseMeta) -> Result<()>;

    async fn count(&self, collection: &str, filter: &ChunkFilter) -> Result<usize>;
}
