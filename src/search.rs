//! Search service: query → embedding → per-collection fan-out → merged ranking.
//!
//! # Pipeline
//!
//! 1. Normalize the query and look up the TTL result cache.
//! 2. Resolve target collections (one named knowledge base, or all of them).
//! 3. Embed the query once.
//! 4. Query every collection concurrently, each under its own timeout. A
//!    collection that errors or times out is logged and skipped.
//! 5. Merge, stable-sort by similarity descending (ties keep knowledge-base
//!    order, then per-collection order), truncate to `max_results`.
//! 6. Cache and return.
//!
//! Cached entries are never invalidated by writes; they expire by TTL only,
//! so a rename or delete can be visible late by up to `cache_ttl_secs`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::SearchCache;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::models::{KnowledgeBaseMeta, SearchResult};
use crate::store::{collection_name, Candidate, ChunkFilter, VectorStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub knowledge_base: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub query_time_ms: u64,
    /// True when served from the result cache.
    pub cached: bool,
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `query|kb|language|max`, each text field prefixed with its byte length
/// so a `|` inside a name can't collide with another key.
pub fn cache_key(
    normalized_query: &str,
    knowledge_base: Option<&str>,
    language: Option<&str>,
    max_results: usize,
) -> String {
    let field = |s: &str| format!("{}:{}", s.len(), s);
    format!(
        "{}|{}|{}|{}",
        field(normalized_query),
        field(knowledge_base.unwrap_or("")),
        field(language.unwrap_or("")),
        max_results
    )
}

pub struct SearchService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    cache: SearchCache<Vec<SearchResult>>,
    default_max_results: usize,
    candidate_k: usize,
    collection_timeout: Duration,
}

impl SearchService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<Embedder>, config: &SearchConfig) -> Self {
        Self {
            store,
            embedder,
            cache: SearchCache::new(Duration::from_secs(config.cache_ttl_secs)),
            default_max_results: config.max_results,
            candidate_k: config.candidate_k,
            collection_timeout: Duration::from_secs(config.collection_timeout_secs),
        }
    }

    pub fn cache(&self) -> &SearchCache<Vec<SearchResult>> {
        &self.cache
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let max_results = request
            .max_results
            .unwrap_or(self.default_max_results)
            .max(1);
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase);
        let knowledge_base = request
            .knowledge_base
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        // The normalized form only keys the cache; the caller's text is embedded.
        let query = normalize_query(&request.query);
        if query.is_empty() {
            return Ok(respond(Vec::new(), started, false));
        }

        let key = cache_key(&query, knowledge_base, language.as_deref(), max_results);
        if let Some(results) = self.cache.get(&key) {
            debug!(query = %query, "search cache hit");
            return Ok(respond(results, started, true));
        }

        let targets = self.resolve_targets(knowledge_base).await?;
        let results = if targets.is_empty() {
            Vec::new()
        } else {
            let vector = self
                .embedder
                .embed_query(request.query.trim())
                .await
                .context("embedding search query")?;
            self.fan_out(targets, vector, language, max_results).await
        };

        self.cache.insert(key, results.clone());
        Ok(respond(results, started, false))
    }

    async fn resolve_targets(&self, knowledge_base: Option<&str>) -> Result<Vec<KnowledgeBaseMeta>> {
        match knowledge_base {
            Some(name) => {
                let meta = self
                    .store
                    .get_collection(&collection_name(name))
                    .await?
                    .or_not_found(name)?;
                Ok(vec![meta])
            }
            None => self.store.list_collections().await,
        }
    }

    async fn fan_out(
        &self,
        targets: Vec<KnowledgeBaseMeta>,
        vector: Vec<f32>,
        language: Option<String>,
        max_results: usize,
    ) -> Vec<SearchResult> {
        let vector = Arc::new(vector);
        let filter = ChunkFilter::language(language);
        let k = self.candidate_k.max(max_results);
        let mut per_collection: Vec<Option<Vec<Candidate>>> = vec![None; targets.len()];

        let mut set = JoinSet::new();
        for (pos, meta) in targets.iter().enumerate() {
            if meta.dims != vector.len() {
                warn!(
                    kb = %meta.name,
                    expected = meta.dims,
                    actual = vector.len(),
                    "skipping knowledge base built with a different embedding model"
                );
                continue;
            }
            let store = Arc::clone(&self.store);
            let vector = Arc::clone(&vector);
            let filter = filter.clone();
            let collection = meta.collection.clone();
            let timeout = self.collection_timeout;
            set.spawn(async move {
                let result = tokio::time::timeout(
                    timeout,
                    store.query_by_vector(&collection, &vector, k, &filter),
                )
                .await;
                (pos, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((pos, Ok(Ok(candidates)))) => per_collection[pos] = Some(candidates),
                Ok((pos, Ok(Err(e)))) => {
                    warn!(kb = %targets[pos].name, error = %e, "collection query failed; skipping")
                }
                Ok((pos, Err(_))) => warn!(
                    kb = %targets[pos].name,
                    timeout_secs = self.collection_timeout.as_secs(),
                    "collection query timed out; skipping"
                ),
                Err(e) => warn!(error = %e, "collection query task failed"),
            }
        }

        let mut results: Vec<SearchResult> = targets
            .iter()
            .zip(per_collection)
            .filter_map(|(meta, hits)| hits.map(|h| (meta, h)))
            .flat_map(|(meta, hits)| {
                hits.into_iter()
                    .map(move |c| to_result(&meta.name, c))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(max_results);
        results
    }
}

fn to_result(knowledge_base: &str, candidate: Candidate) -> SearchResult {
    let score = candidate.similarity().clamp(0.0, 1.0);
    let c = candidate.chunk;
    SearchResult {
        knowledge_base: knowledge_base.to_string(),
        file_path: c.file_path,
        relative_path: c.relative_path,
        start_line: c.start_line,
        end_line: c.end_line,
        chunk_kind: c.kind,
        heading_path: c.heading_path,
        content: c.content,
        score,
        document_type: c.document_type,
        language: c.language,
    }
}

fn respond(results: Vec<SearchResult>, started: Instant, cached: bool) -> SearchResponse {
    SearchResponse {
        total_results: results.len(),
        results,
        query_time_ms: started.elapsed().as_millis() as u64,
        cached,
    }
}

/// CLI entry point for `docmem search`.
pub async fn run_search(service: &SearchService, request: &SearchRequest) -> Result<()> {
    let response = service.search(request).await?;
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in response.results.iter().enumerate() {
        let heading = if r.heading_path.is_empty() {
            String::new()
        } else {
            format!(" § {}", r.heading_path.join(" > "))
        };
        println!(
            "{}. [{:.2}] {}:{}-{} ({}){}",
            i + 1,
            r.score,
            r.relative_path,
            r.start_line,
            r.end_line,
            r.knowledge_base,
            heading
        );
        let snippet: String = r.content.chars().take(200).collect();
        println!("    {}", snippet.replace('\n', " "));
        println!();
    }
    println!(
        "{} results in {} ms",
        response.total_results, response.query_time_ms
    );
    Ok(())
}
