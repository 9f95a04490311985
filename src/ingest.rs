//! Ingestion pipeline orchestration.
//!
//! Coordinates one full re-index of a knowledge base: scan → extract →
//! chunk → embed → batched upsert → stale reconcile → metadata.
//!
//! Every run is tagged with its start time in milliseconds. Chunks written by
//! the run carry that timestamp; once every file has been written, chunks
//! with an older timestamp are deleted. A run that fails part-way removes
//! what it wrote, so the previous chunk set stays the only visible one.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_text, ChunkConfig};
use crate::context::AppContext;
use crate::embedding::content_hash;
use crate::error::{EmbeddingError, StoreError};
use crate::extract::read_document_text;
use crate::models::{Chunk, DocumentType, KnowledgeBaseMeta};
use crate::scan::{scan, ScanOptions, ScanStats};
use crate::store::{collection_name, ChunkFilter, Lookup, SCHEMA_VERSION};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Scan and chunk only; nothing is embedded or written.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub knowledge_base: String,
    pub collection: String,
    pub ingestion_timestamp: i64,
    pub dry_run: bool,
    pub scan: ScanStats,
    /// Supported files that produced at least one chunk.
    pub files_indexed: usize,
    /// Supported files with no text after extraction.
    pub files_empty: usize,
    /// Supported files that could not be read or extracted.
    pub files_failed: usize,
    /// Chunks written, or the estimate for a dry run.
    pub chunks_written: usize,
    pub embeddings_computed: usize,
    pub embeddings_cached: usize,
    pub stale_chunks_removed: usize,
}

/// Deterministic chunk id for (file, run, ordinal).
pub fn chunk_id(file_path: &str, ingestion_timestamp: i64, index: usize) -> String {
    let key = format!("{}\0{}\0{}", file_path, ingestion_timestamp, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

fn chunk_config_for(base: ChunkConfig, doc_type: DocumentType) -> ChunkConfig {
    ChunkConfig {
        detect_headings: !matches!(doc_type, DocumentType::Code | DocumentType::Data),
        ..base
    }
}

/// Re-index `root` into the knowledge base `name`.
pub async fn ingest(
    ctx: &AppContext,
    name: &str,
    root: &Path,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let name = name.trim();
    if name.is_empty() {
        bail!("knowledge base name must not be empty");
    }
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Failed to resolve ingest root: {}", root.display()))?;

    let collection = collection_name(name);
    let existing = ctx
        .store
        .get_collection(&collection)
        .await
        .with_context(|| format!("ingest '{}': reading collection metadata", name))?;

    if let Lookup::Found(meta) = &existing {
        if meta.name != name {
            return Err(StoreError::AlreadyExists {
                name: meta.name.clone(),
            })
            .with_context(|| {
                format!(
                    "'{}' maps to collection {} which belongs to knowledge base '{}'",
                    name, collection, meta.name
                )
            });
        }
    }

    if !options.dry_run {
        if !ctx.embedder.is_enabled() {
            return Err(EmbeddingError::Disabled.into());
        }
        if let Lookup::Found(meta) = &existing {
            if meta.dims != ctx.embedder.dims() {
                bail!(
                    "knowledge base '{}' was built with {} ({} dims) but the configured model is {} ({} dims); delete it first to re-index with the new model",
                    name,
                    meta.embedding_model,
                    meta.dims,
                    ctx.embedder.model_name(),
                    ctx.embedder.dims()
                );
            }
        }
    }

    // Strictly after the previous run, so the stale reconcile never keeps old chunks.
    let now = chrono::Utc::now().timestamp_millis();
    let ts = match &existing {
        Lookup::Found(meta) => now.max(meta.last_ingested_at + 1),
        Lookup::NotFound => now,
    };

    let scan_options = ScanOptions::from(&ctx.config.scan);
    let (files, scan_stats) = scan(&root, &scan_options)?;
    info!(
        kb = %name,
        root = %root.display(),
        supported = scan_stats.supported_files,
        unsupported = scan_stats.unsupported_files,
        "scan complete"
    );

    let mut report = IngestReport {
        knowledge_base: name.to_string(),
        collection: collection.clone(),
        ingestion_timestamp: ts,
        dry_run: options.dry_run,
        scan: scan_stats,
        files_indexed: 0,
        files_empty: 0,
        files_failed: 0,
        chunks_written: 0,
        embeddings_computed: 0,
        embeddings_cached: 0,
        stale_chunks_removed: 0,
    };

    let mut meta = match &existing {
        Lookup::Found(meta) => meta.clone(),
        Lookup::NotFound => KnowledgeBaseMeta {
            name: name.to_string(),
            collection: collection.clone(),
            root_path: root.to_string_lossy().to_string(),
            file_count: 0,
            chunk_count: 0,
            created_at: ts,
            last_ingested_at: ts,
            schema_version: SCHEMA_VERSION,
            embedding_model: ctx.embedder.model_name().to_string(),
            dims: ctx.embedder.dims(),
        },
    };

    if !options.dry_run {
        ctx.store
            .ensure_collection(&meta)
            .await
            .with_context(|| format!("ingest '{}': creating collection", name))?;
    }

    let base_config = ChunkConfig::from(&ctx.config.chunking);
    let mut writer = BatchWriter::new(ctx, &collection, ctx.config.ingest.write_batch_size);

    let outcome: Result<()> = async {
        for file in files.iter().filter(|f| f.supported) {
            let Some(doc_type) = file.document_type else {
                continue;
            };

            let path = file.path.clone();
            let text = match tokio::task::spawn_blocking(move || read_document_text(&path, doc_type))
                .await?
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(kb = %name, path = %file.path.display(), error = %e, "skipping file");
                    report.files_failed += 1;
                    continue;
                }
            };

            let pieces = chunk_text(&text, &chunk_config_for(base_config, doc_type));
            if pieces.is_empty() {
                report.files_empty += 1;
                continue;
            }
            report.files_indexed += 1;
            debug!(path = %file.relative_path, chunks = pieces.len(), "chunked");

            if options.dry_run {
                report.chunks_written += pieces.len();
                continue;
            }

            let file_path = file.path.to_string_lossy().to_string();
            for (index, piece) in pieces.into_iter().enumerate() {
                writer
                    .push(Chunk {
                        id: chunk_id(&file_path, ts, index),
                        kb_name: name.to_string(),
                        file_path: file_path.clone(),
                        relative_path: file.relative_path.clone(),
                        chunk_index: index,
                        content_hash: content_hash(&piece.content),
                        content: piece.content,
                        kind: piece.kind,
                        heading_path: piece.heading_path,
                        start_line: piece.start_line,
                        end_line: piece.end_line,
                        start_offset: piece.start_offset,
                        end_offset: piece.end_offset,
                        token_estimate: piece.token_estimate,
                        has_context: piece.has_context,
                        ingestion_timestamp: ts,
                        document_type: doc_type,
                        language: file.language.clone(),
                        is_test: file.is_test,
                    })
                    .await?;
            }
        }
        writer.flush().await
    }
    .await;

    if options.dry_run {
        outcome?;
        return Ok(report);
    }

    if let Err(e) = outcome {
        rollback(ctx, &collection, ts, existing.is_found()).await;
        return Err(e).with_context(|| format!("ingest '{}' failed; previous data kept", name));
    }

    report.chunks_written = writer.written;
    report.embeddings_computed = writer.computed;
    report.embeddings_cached = writer.cached;

    report.stale_chunks_removed = ctx
        .store
        .delete_by_filter(&collection, &ChunkFilter::before(ts))
        .await
        .with_context(|| format!("ingest '{}': removing stale chunks", name))?;

    meta.root_path = root.to_string_lossy().to_string();
    meta.file_count = report.files_indexed;
    meta.chunk_count = ctx.store.count(&collection, &ChunkFilter::all()).await?;
    meta.last_ingested_at = ts;
    meta.embedding_model = ctx.embedder.model_name().to_string();
    meta.dims = ctx.embedder.dims();
    ctx.store
        .update_metadata(&meta)
        .await
        .with_context(|| format!("ingest '{}': writing metadata", name))?;

    info!(
        kb = %name,
        files = report.files_indexed,
        chunks = report.chunks_written,
        stale = report.stale_chunks_removed,
        "ingest complete"
    );
    Ok(report)
}

/// Undo a failed run: remove its chunks, or the whole collection if the run created it.
async fn rollback(ctx: &AppContext, collection: &str, ts: i64, existed: bool) {
    let result = if existed {
        ctx.store
            .delete_by_filter(collection, &ChunkFilter::ingestion_timestamp(ts))
            .await
            .map(|_| ())
    } else {
        ctx.store.drop_collection(collection).await
    };
    if let Err(e) = result {
        warn!(collection, error = %e, "rollback after failed ingest did not complete");
    }
}

/// Buffers chunks and writes them in bounded batches, embedding each batch
/// just before its upsert.
struct BatchWriter<'a> {
    ctx: &'a AppContext,
    collection: &'a str,
    batch_size: usize,
    pending: Vec<Chunk>,
    written: usize,
    computed: usize,
    cached: usize,
}

impl<'a> BatchWriter<'a> {
    fn new(ctx: &'a AppContext, collection: &'a str, batch_size: usize) -> Self {
        Self {
            ctx,
            collection,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            written: 0,
            computed: 0,
            cached: 0,
        }
    }

    async fn push(&mut self, chunk: Chunk) -> Result<()> {
        self.pending.push(chunk);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let (vectors, counts) = self.ctx.embedder.embed_batch_counted(&texts).await?;
        self.ctx
            .store
            .upsert(self.collection, &batch, &vectors)
            .await?;
        self.written += batch.len();
        self.computed += counts.computed;
        self.cached += counts.cached;
        debug!(collection = self.collection, written = self.written, "batch written");
        Ok(())
    }
}

/// CLI entry point for `docmem ingest`.
pub async fn run_ingest(ctx: &AppContext, name: &str, root: &Path, dry_run: bool) -> Result<()> {
    let report = ingest(ctx, name, root, &IngestOptions { dry_run }).await?;

    if report.dry_run {
        println!("ingest {} (dry-run)", report.knowledge_base);
    } else {
        println!("ingest {}", report.knowledge_base);
    }
    println!("  root: {}", root.display());
    println!(
        "  files: {} scanned, {} supported, {} unsupported",
        report.scan.total_files, report.scan.supported_files, report.scan.unsupported_files
    );
    println!("  indexed files: {}", report.files_indexed);
    if report.files_empty > 0 {
        println!("  empty files: {}", report.files_empty);
    }
    if report.files_failed > 0 {
        println!("  failed files: {}", report.files_failed);
    }
    if report.dry_run {
        println!("  estimated chunks: {}", report.chunks_written);
        return Ok(());
    }
    println!("  chunks written: {}", report.chunks_written);
    println!(
        "  embeddings: {} computed, {} cached",
        report.embeddings_computed, report.embeddings_cached
    );
    println!("  stale chunks removed: {}", report.stale_chunks_removed);
    println!("  chunk set: {}", report.ingestion_timestamp);
    println!("ok");
    Ok(())
}
