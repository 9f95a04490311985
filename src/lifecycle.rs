//! Knowledge-base lifecycle: list, stats, chunk sets, rename, delete.
//!
//! Callers must not run these concurrently with an ingest of the same
//! knowledge base; nothing here takes a lock. Operations on different
//! knowledge bases are independent.
//!
//! # Rename protocol
//!
//! 1. Read every record (chunk + vector) of the old collection.
//! 2. Create the new collection with the carried-forward metadata.
//! 3. Copy the records in bounded batches with `kb_name` rewritten.
//!    A failure here drops the partial new collection; the old one was never
//!    touched and stays authoritative.
//! 4. Drop the old collection, retrying with backoff. If every attempt
//!    fails, the rename still succeeds (the new collection holds the data)
//!    but the report says `old_collection_dropped: false` and a warning is
//!    logged; `delete <old>` finishes the cleanup.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{format_ts_iso, KnowledgeBaseMeta};
use crate::store::{collection_name, ChunkFilter, VectorStore};

const DROP_ATTEMPTS: u32 = 3;
const DROP_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseInfo {
    pub name: String,
    pub collection: String,
    pub root_path: String,
    pub file_count: usize,
    pub chunk_count: usize,
    pub created_at: String,
    pub last_ingested_at: String,
    pub embedding_model: String,
    pub dims: usize,
}

impl From<&KnowledgeBaseMeta> for KnowledgeBaseInfo {
    fn from(m: &KnowledgeBaseMeta) -> Self {
        Self {
            name: m.name.clone(),
            collection: m.collection.clone(),
            root_path: m.root_path.clone(),
            file_count: m.file_count,
            chunk_count: m.chunk_count,
            created_at: format_ts_iso(m.created_at),
            last_ingested_at: format_ts_iso(m.last_ingested_at),
            embedding_model: m.embedding_model.clone(),
            dims: m.dims,
        }
    }
}

/// Chunks grouped by the ingest run that wrote them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSetInfo {
    pub ingestion_timestamp: i64,
    pub ingested_at: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBaseStats {
    #[serde(flatten)]
    pub info: KnowledgeBaseInfo,
    /// Distinct source files among the stored chunks.
    pub distinct_files: usize,
    pub document_types: BTreeMap<String, usize>,
    pub chunk_kinds: BTreeMap<String, usize>,
    pub total_content_bytes: usize,
    pub test_chunks: usize,
    pub chunk_sets: Vec<ChunkSetInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenameReport {
    pub old_name: String,
    pub new_name: String,
    pub old_collection: String,
    pub new_collection: String,
    pub chunks_copied: usize,
    /// False when the old collection is still present and needs a manual delete.
    pub old_collection_dropped: bool,
}

pub struct KnowledgeBaseManager {
    store: Arc<dyn VectorStore>,
    write_batch_size: usize,
}

impl KnowledgeBaseManager {
    pub fn new(store: Arc<dyn VectorStore>, write_batch_size: usize) -> Self {
        Self {
            store,
            write_batch_size: write_batch_size.max(1),
        }
    }

    async fn require(&self, name: &str) -> Result<KnowledgeBaseMeta> {
        let meta = self
            .store
            .get_collection(&collection_name(name))
            .await?
            .or_not_found(name)?;
        Ok(meta)
    }

    pub async fn list(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        let mut infos: Vec<KnowledgeBaseInfo> = self
            .store
            .list_collections()
            .await?
            .iter()
            .map(KnowledgeBaseInfo::from)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Full scan of the knowledge base's chunk records.
    pub async fn stats(&self, name: &str) -> Result<KnowledgeBaseStats> {
        let meta = self.require(name).await?;
        let chunks = self
            .store
            .get_all(&meta.collection, &ChunkFilter::all())
            .await
            .with_context(|| format!("stats for '{}'", name))?;

        let mut files = BTreeSet::new();
        let mut document_types = BTreeMap::new();
        let mut chunk_kinds = BTreeMap::new();
        let mut sets: BTreeMap<i64, usize> = BTreeMap::new();
        let mut total_content_bytes = 0;
        let mut test_chunks = 0;
        for c in &chunks {
            files.insert(c.file_path.as_str());
            *document_types
                .entry(c.document_type.as_str().to_string())
                .or_insert(0) += 1;
            *chunk_kinds.entry(c.kind.as_str().to_string()).or_insert(0) += 1;
            *sets.entry(c.ingestion_timestamp).or_insert(0) += 1;
            total_content_bytes += c.content.len();
            if c.is_test {
                test_chunks += 1;
            }
        }

        let mut info = KnowledgeBaseInfo::from(&meta);
        info.chunk_count = chunks.len();
        Ok(KnowledgeBaseStats {
            info,
            distinct_files: files.len(),
            document_types,
            chunk_kinds,
            total_content_bytes,
            test_chunks,
            chunk_sets: to_chunk_sets(sets),
        })
    }

    pub async fn chunk_sets(&self, name: &str) -> Result<Vec<ChunkSetInfo>> {
        let meta = self.require(name).await?;
        let mut sets: BTreeMap<i64, usize> = BTreeMap::new();
        for c in self
            .store
            .get_all(&meta.collection, &ChunkFilter::all())
            .await?
        {
            *sets.entry(c.ingestion_timestamp).or_insert(0) += 1;
        }
        Ok(to_chunk_sets(sets))
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<RenameReport> {
        let old_name = old_name.trim();
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StoreError::Invalid("new name must not be empty".into()).into());
        }
        if old_name == new_name {
            return Err(StoreError::Invalid(format!(
                "'{}' is already named '{}'",
                old_name, new_name
            ))
            .into());
        }

        let old_meta = self.require(old_name).await?;
        let new_collection = collection_name(new_name);
        if new_collection == old_meta.collection {
            return Err(StoreError::Invalid(format!(
                "'{}' and '{}' map to the same collection {}",
                old_name, new_name, new_collection
            ))
            .into());
        }
        if let Some(existing) = self.store.get_collection(&new_collection).await?.found() {
            return Err(StoreError::AlreadyExists {
                name: existing.name,
            }
            .into());
        }

        let records = self
            .store
            .get_all_with_vectors(&old_meta.collection, &ChunkFilter::all())
            .await
            .with_context(|| format!("rename '{}': reading records", old_name))?;

        let mut new_meta = old_meta.clone();
        new_meta.name = new_name.to_string();
        new_meta.collection = new_collection.clone();
        new_meta.chunk_count = records.len();

        if let Err(e) = self.copy_into(&new_meta, records).await {
            if let Err(cleanup) = self.store.drop_collection(&new_collection).await {
                warn!(collection = %new_collection, error = %cleanup, "could not remove partial rename target");
            }
            return Err(e).with_context(|| {
                format!("rename '{}' -> '{}' failed; '{}' is unchanged", old_name, new_name, old_name)
            });
        }

        let dropped = self.drop_with_retry(&old_meta.collection).await;
        if !dropped {
            warn!(
                old = %old_name,
                new = %new_name,
                collection = %old_meta.collection,
                "renamed, but the old collection could not be dropped; delete it manually"
            );
        }
        info!(old = %old_name, new = %new_name, chunks = new_meta.chunk_count, "renamed knowledge base");

        Ok(RenameReport {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            old_collection: old_meta.collection,
            new_collection,
            chunks_copied: new_meta.chunk_count,
            old_collection_dropped: dropped,
        })
    }

    async fn copy_into(
        &self,
        meta: &KnowledgeBaseMeta,
        records: Vec<crate::store::StoredChunk>,
    ) -> Result<()> {
        self.store.ensure_collection(meta).await?;
        for batch in records.chunks(self.write_batch_size) {
            let chunks: Vec<_> = batch
                .iter()
                .map(|r| {
                    let mut c = r.chunk.clone();
                    c.kb_name = meta.name.clone();
                    c
                })
                .collect();
            let vectors: Vec<Vec<f32>> = batch.iter().map(|r| r.vector.clone()).collect();
            self.store.upsert(&meta.collection, &chunks, &vectors).await?;
        }
        self.store.update_metadata(meta).await
    }

    async fn drop_with_retry(&self, collection: &str) -> bool {
        for attempt in 1..=DROP_ATTEMPTS {
            match self.store.drop_collection(collection).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(collection, attempt, error = %e, "dropping old collection failed");
                    if attempt < DROP_ATTEMPTS {
                        tokio::time::sleep(DROP_BACKOFF * 2u32.pow(attempt - 1)).await;
                    }
                }
            }
        }
        false
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let meta = self.require(name).await?;
        self.store
            .drop_collection(&meta.collection)
            .await
            .with_context(|| format!("delete '{}'", name))?;
        info!(kb = %name, "deleted knowledge base");
        Ok(())
    }

    /// Delete the chunks written by one ingest run. Returns how many were
    /// removed; zero is not an error.
    pub async fn delete_chunk_set(&self, name: &str, ingestion_timestamp: i64) -> Result<usize> {
        let mut meta = self.require(name).await?;
        let removed = self
            .store
            .delete_by_filter(
                &meta.collection,
                &ChunkFilter::ingestion_timestamp(ingestion_timestamp),
            )
            .await
            .with_context(|| format!("delete chunk set {} of '{}'", ingestion_timestamp, name))?;

        if removed > 0 {
            let remaining = self
                .store
                .get_all(&meta.collection, &ChunkFilter::all())
                .await?;
            meta.chunk_count = remaining.len();
            meta.file_count = remaining
                .iter()
                .map(|c| c.file_path.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            self.store.update_metadata(&meta).await?;
        }
        info!(kb = %name, ingestion_timestamp, removed, "deleted chunk set");
        Ok(removed)
    }
}

fn to_chunk_sets(sets: BTreeMap<i64, usize>) -> Vec<ChunkSetInfo> {
    sets.into_iter()
        .map(|(ts, chunk_count)| ChunkSetInfo {
            ingestion_timestamp: ts,
            ingested_at: format_ts_iso(ts),
            chunk_count,
        })
        .collect()
}

// ============ CLI printers ============

pub async fn run_list(manager: &KnowledgeBaseManager) -> Result<()> {
    let kbs = manager.list().await?;
    if kbs.is_empty() {
        println!("No knowledge bases.");
        return Ok(());
    }
    println!(
        "{:<24} {:>7} {:>8}   {:<20}   {}",
        "NAME", "FILES", "CHUNKS", "LAST INGEST", "ROOT"
    );
    for kb in &kbs {
        println!(
            "{:<24} {:>7} {:>8}   {:<20}   {}",
            kb.name, kb.file_count, kb.chunk_count, kb.last_ingested_at, kb.root_path
        );
    }
    Ok(())
}

pub async fn run_stats(manager: &KnowledgeBaseManager, name: &str) -> Result<()> {
    let s = manager.stats(name).await?;
    println!("{}", s.info.name);
    println!("  collection:  {}", s.info.collection);
    println!("  root:        {}", s.info.root_path);
    println!("  model:       {} ({} dims)", s.info.embedding_model, s.info.dims);
    println!("  files:       {}", s.info.file_count);
    println!("  chunks:      {}", s.info.chunk_count);
    println!("  test chunks: {}", s.test_chunks);
    println!("  content:     {} bytes", s.total_content_bytes);
    println!("  created:     {}", s.info.created_at);
    println!("  last ingest: {}", s.info.last_ingested_at);
    if !s.document_types.is_empty() {
        println!("  document types:");
        for (t, n) in &s.document_types {
            println!("    {:<10} {}", t, n);
        }
    }
    if !s.chunk_kinds.is_empty() {
        println!("  chunk kinds:");
        for (k, n) in &s.chunk_kinds {
            println!("    {:<10} {}", k, n);
        }
    }
    Ok(())
}

pub async fn run_chunk_sets(manager: &KnowledgeBaseManager, name: &str) -> Result<()> {
    let sets = manager.chunk_sets(name).await?;
    if sets.is_empty() {
        println!("No chunk sets.");
        return Ok(());
    }
    println!("{:<15} {:<22} {:>8}", "TIMESTAMP", "INGESTED AT", "CHUNKS");
    for s in &sets {
        println!(
            "{:<15} {:<22} {:>8}",
            s.ingestion_timestamp, s.ingested_at, s.chunk_count
        );
    }
    Ok(())
}

pub async fn run_rename(manager: &KnowledgeBaseManager, old: &str, new: &str) -> Result<()> {
    let report = manager.rename(old, new).await?;
    println!("rename {} -> {}", report.old_name, report.new_name);
    println!("  chunks copied: {}", report.chunks_copied);
    if !report.old_collection_dropped {
        println!(
            "  warning: old collection {} is still present; run `docmem delete {}`",
            report.old_collection, report.old_name
        );
    }
    println!("ok");
    Ok(())
}

pub async fn run_delete(manager: &KnowledgeBaseManager, name: &str) -> Result<()> {
    manager.delete(name).await?;
    println!("delete {}", name);
    println!("ok");
    Ok(())
}

pub async fn run_delete_chunk_set(
    manager: &KnowledgeBaseManager,
    name: &str,
    ingestion_timestamp: i64,
) -> Result<()> {
    let removed = manager.delete_chunk_set(name, ingestion_timestamp).await?;
    println!("delete chunk set {} from {}", ingestion_timestamp, name);
    println!("  chunks removed: {}", removed);
    println!("ok");
    Ok(())
}
