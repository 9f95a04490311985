//! Embedding providers and the caching [`Embedder`] adapter.
//!
//! Providers implement [`EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: every call fails with [`EmbeddingError::Disabled`].
//! - **[`HashProvider`]**: deterministic feature hashing, fully offline.
//! - **[`OpenAIProvider`]** / **[`OllamaProvider`]**: HTTP APIs with retry and backoff.
//! - **`LocalProvider`**: fastembed inference, behind the `local-embeddings` feature.
//!
//! [`Embedder`] wraps a provider with the content-hash [`EmbeddingCache`],
//! request batching and result validation. Ingest and search only ever talk
//! to the `Embedder`.
//!
//! Also provides the vector utilities the stores use:
//! [`cosine_similarity`], [`vec_to_blob`] and [`blob_to_vec`].

mod http;
#[cfg(feature = "local-embeddings")]
mod local;

pub use http::{OllamaProvider, OpenAIProvider};
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Default dimensionality of the `hash` provider.
pub const DEFAULT_HASH_DIMS: usize = 256;

/// A backend that turns texts into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Hash Provider ============

/// Bag-of-words feature hashing: each lowercase alphanumeric token adds 1.0
/// to bucket `sha256(token) mod dims`, then the vector is L2-normalized.
///
/// Texts sharing vocabulary land close together, which is enough for
/// offline use and for tests that need stable rankings.
pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            model: format!("feature-hash-{}", dims),
            dims,
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hash" => Ok(Box::new(HashProvider::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => anyhow::bail!(
            "Local embedding provider requires building with --features local-embeddings"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Embedder ============

/// Cache accounting for one [`Embedder::embed_batch_counted`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedCounts {
    /// Distinct texts sent to the provider.
    pub computed: usize,
    /// Inputs answered from the cache.
    pub cached: usize,
}

/// The embedding adapter: provider + content-hash cache + batching.
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
}

impl Embedder {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig, cache: Arc<EmbeddingCache>) -> Result<Self> {
        Ok(Self::new(create_provider(config)?, cache, config.batch_size))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.model_name() != "disabled"
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed `texts`, same length and order as the input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_batch_counted(texts).await.map(|(v, _)| v)
    }

    /// Like [`embed_batch`](Self::embed_batch), also reporting cache hits.
    ///
    /// Identical texts are sent to the provider once. Every returned vector
    /// is checked against the advertised dimension before anything is
    /// cached or returned.
    pub async fn embed_batch_counted(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, EmbedCounts), EmbeddingError> {
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut slots: Vec<Option<Vec<f32>>> = hashes.iter().map(|h| self.cache.get(h)).collect();
        let cached = slots.iter().filter(|s| s.is_some()).count();

        let mut miss_texts: Vec<String> = Vec::new();
        let mut miss_hashes: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, slot) in slots.iter().enumerate() {
            if slot.is_none() && seen.insert(hashes[i].as_str()) {
                miss_texts.push(texts[i].clone());
                miss_hashes.push(hashes[i].as_str());
            }
        }

        let mut fresh: HashMap<&str, Vec<f32>> = HashMap::with_capacity(miss_texts.len());
        for (batch_texts, batch_hashes) in miss_texts
            .chunks(self.batch_size)
            .zip(miss_hashes.chunks(self.batch_size))
        {
            debug!(count = batch_texts.len(), model = self.model_name(), "embedding batch");
            let vectors = self.provider.embed(batch_texts).await?;
            self.validate(batch_texts.len(), &vectors)?;
            for (&hash, vector) in batch_hashes.iter().zip(vectors) {
                self.cache.insert(hash.to_string(), vector.clone());
                fresh.insert(hash, vector);
            }
        }

        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = fresh.get(hashes[i].as_str()).cloned();
            }
        }
        let vectors = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: cached + fresh.len(),
            })?;

        Ok((
            vectors,
            EmbedCounts {
                computed: miss_texts.len(),
                cached,
            },
        ))
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResponse)
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        let dims = self.provider.dims();
        for v in vectors {
            if v.is_empty() {
                return Err(EmbeddingError::EmptyResponse);
            }
            if v.len() != dims {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
        }
        Ok(())
    }
}

/// SHA-256 hex digest of a chunk's text; the embedding cache key.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`]. Trailing bytes that do not form an `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance mapped onto `[0, 1]`: `(1 - cos) / 2`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let cos = cosine_similarity(a, b).clamp(-1.0, 1.0) as f64;
    (1.0 - cos) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the size of every provider call; can be told to return bad dims.
    struct CountingProvider {
        inner: HashProvider,
        calls: Arc<std::sync::Mutex<Vec<usize>>>,
        wrong_dims: bool,
    }

    impl CountingProvider {
        fn new(wrong_dims: bool) -> (Self, Arc<std::sync::Mutex<Vec<usize>>>) {
            let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
            let provider = Self {
                inner: HashProvider::new(16),
                calls: calls.clone(),
                wrong_dims,
            };
            (provider, calls)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            16
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.lock().unwrap().push(texts.len());
            if self.wrong_dims {
                return Ok(texts.iter().map(|_| vec![0.1; 8]).collect());
            }
            self.inner.embed(texts).await
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_cosine_distance_range() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_hash_provider_deterministic_and_normalized() {
        let p = HashProvider::new(64);
        let a = p.embed_one("Vector search over Markdown");
        let b = p.embed_one("vector SEARCH over markdown");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_provider_shared_words_score_higher() {
        let p = HashProvider::new(256);
        let q = p.embed_one("rust borrow checker");
        let near = p.embed_one("the borrow checker in rust");
        let far = p.embed_one("baking sourdough bread");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let embedder = Embedder::new(Box::new(DisabledProvider), Arc::new(EmbeddingCache::new()), 8);
        let err = embedder.embed_query("hi").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
        assert!(!embedder.is_enabled());
    }

    #[tokio::test]
    async fn test_embedder_serves_repeats_from_cache() {
        let cache = Arc::new(EmbeddingCache::new());
        let (provider, calls) = CountingProvider::new(false);
        let embedder = Embedder::new(Box::new(provider), cache.clone(), 8);

        let texts = strings(&["alpha", "beta", "alpha"]);
        let (first, counts) = embedder.embed_batch_counted(&texts).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], first[2]);
        assert_eq!(counts, EmbedCounts { computed: 2, cached: 0 });
        assert_eq!(cache.len(), 2);

        let (second, counts) = embedder.embed_batch_counted(&texts).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(counts, EmbedCounts { computed: 0, cached: 3 });
        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_embedder_respects_batch_size() {
        let (provider, calls) = CountingProvider::new(false);
        let embedder = Embedder::new(Box::new(provider), Arc::new(EmbeddingCache::new()), 2);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert!(vectors.iter().all(|v| v.len() == 16));
        assert_eq!(*calls.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal_and_not_cached() {
        let cache = Arc::new(EmbeddingCache::new());
        let (provider, _) = CountingProvider::new(true);
        let embedder = Embedder::new(Box::new(provider), cache.clone(), 8);
        let err = embedder.embed_batch(&strings(&["x"])).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 16,
                actual: 8
            }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_create_provider_hash_default_dims() {
        let config = EmbeddingConfig {
            provider: "hash".into(),
            ..EmbeddingConfig::default()
        };
        let p = create_provider(&config).unwrap();
        assert_eq!(p.dims(), DEFAULT_HASH_DIMS);
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
