//! In-memory [`VectorStore`] for tests.
//!
//! Collections are `Vec`s behind one `std::sync::RwLock`; queries are
//! brute-force cosine over every row, in insertion order.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{rank_candidates, Candidate, ChunkFilter, Lookup, StoredChunk, VectorStore, SCHEMA_VERSION};
use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::{Chunk, KnowledgeBaseMeta};

struct Collection {
    meta: KnowledgeBaseMeta,
    rows: Vec<StoredChunk>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn missing(collection: &str) -> anyhow::Error {
    StoreError::not_found(collection).into()
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(&self, meta: &KnowledgeBaseMeta) -> Result<()> {
        let mut map = self.write()?;
        map.entry(meta.collection.clone()).or_insert_with(|| Collection {
            meta: meta.clone(),
            rows: Vec::new(),
        });
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
        let mut map = self.write()?;
        let coll = map.get_mut(collection).ok_or_else(|| missing(collection))?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let row = StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
            };
            match coll.rows.iter_mut().find(|r| r.chunk.id == chunk.id) {
                Some(existing) => *existing = row,
                None => coll.rows.push(row),
            }
        }
        Ok(())
    }

    async fn query_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Candidate>> {
        let map = self.read()?;
        let coll = map.get(collection).ok_or_else(|| missing(collection))?;
        let candidates = coll
            .rows
            .iter()
            .filter(|r| filter.matches(&r.chunk))
            .map(|r| Candidate {
                chunk: r.chunk.clone(),
                distance: cosine_distance(vector, &r.vector),
            })
            .collect();
        Ok(rank_candidates(candidates, k))
    }

    async fn get_all(&self, collection: &str, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        let map = self.read()?;
        let coll = map.get(collection).ok_or_else(|| missing(collection))?;
        Ok(coll
            .rows
            .iter()
            .filter(|r| filter.matches(&r.chunk))
            .map(|r| r.chunk.clone())
            .collect())
    }

    async fn get_all_with_vectors(
        &self,
        collection: &str,
        filter: &ChunkFilter,
    ) -> Result<Vec<StoredChunk>> {
        let map = self.read()?;
        let coll = map.get(collection).ok_or_else(|| missing(collection))?;
        Ok(coll
            .rows
            .iter()
            .filter(|r| filter.matches(&r.chunk))
            .cloned()
            .collect())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &ChunkFilter) -> Result<usize> {
        let mut map = self.write()?;
        let coll = map.get_mut(collection).ok_or_else(|| missing(collection))?;
        let before = coll.rows.len();
        coll.rows.retain(|r| !filter.matches(&r.chunk));
        Ok(before - coll.rows.len())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut map = self.write()?;
        map.remove(collection).ok_or_else(|| missing(collection))?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<KnowledgeBaseMeta>> {
        let map = self.read()?;
        let mut metas: Vec<KnowledgeBaseMeta> = map
            .values()
            .filter(|c| c.meta.schema_version == SCHEMA_VERSION)
            .map(|c| c.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    async fn get_collection(&self, collection: &str) -> Result<Lookup<KnowledgeBaseMeta>> {
        let map = self.read()?;
        Ok(match map.get(collection) {
            Some(c) if c.meta.schema_version == SCHEMA_VERSION => Lookup::Found(c.meta.clone()),
            _ => Lookup::NotFound,
        })
    }

    async fn update_metadata(&self, meta: &KnowledgeBaseMeta) -> Result<()> {
        let mut map = self.write()?;
        let coll = map
            .get_mut(&meta.collection)
            .ok_or_else(|| missing(&meta.collection))?;
        coll.meta = meta.clone();
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &ChunkFilter) -> Result<usize> {
        let map = self.read()?;
        let coll = map.get(collection).ok_or_else(|| missing(collection))?;
        Ok(coll.rows.iter().filter(|r| filter.matches(&r.chunk)).count())
    }
}
