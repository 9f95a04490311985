//! Process-wide application context.
//!
//! Owns the configuration, the vector store, the caching embedder, the
//! search service (with its result cache) and the lifecycle manager. Built
//! once per process and shared by reference or behind an `Arc`; tests build
//! their own with [`AppContext::in_memory`] so caches never leak between them.

use anyhow::Result;
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::lifecycle::KnowledgeBaseManager;
use crate::search::SearchService;
use crate::store::memory::InMemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<Embedder>,
    pub search: SearchService,
    pub lifecycle: KnowledgeBaseManager,
}

impl AppContext {
    pub fn new(config: Config, store: Arc<dyn VectorStore>, embedder: Arc<Embedder>) -> Self {
        let search = SearchService::new(Arc::clone(&store), Arc::clone(&embedder), &config.search);
        let lifecycle =
            KnowledgeBaseManager::new(Arc::clone(&store), config.ingest.write_batch_size);
        Self {
            config,
            store,
            embedder,
            search,
            lifecycle,
        }
    }

    /// SQLite store at `config.db.path`, provider from `[embedding]`.
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config).await?;
        let embedder = Embedder::from_config(&config.embedding, Arc::new(EmbeddingCache::new()))?;
        Ok(Self::new(config, Arc::new(store), Arc::new(embedder)))
    }

    /// Same wiring over an [`InMemoryStore`].
    pub fn in_memory(config: Config) -> Result<Self> {
        let embedder = Embedder::from_config(&config.embedding, Arc::new(EmbeddingCache::new()))?;
        Ok(Self::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(embedder),
        ))
    }

    /// In-memory context with the offline `hash` provider.
    #[cfg(test)]
    pub(crate) fn in_memory_for_tests() -> Self {
        let mut config = Config::minimal();
        config.embedding.provider = "hash".into();
        config.embedding.dims = Some(64);
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 20;
        config.ingest.write_batch_size = 2;
        match Self::in_memory(config) {
            Ok(ctx) => ctx,
            Err(e) => panic!("test context: {e}"),
        }
    }
}
