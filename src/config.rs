//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal file only needs a database path. [`load_config`] rejects values the
//! pipeline cannot run with (zero chunk size, overlap ≥ chunk size, unknown
//! embedding providers) before any command touches the store.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk sizing, in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub respect_ignore_file: bool,
    #[serde(default = "default_true")]
    pub skip_hidden: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            respect_ignore_file: true,
            skip_hidden: true,
            max_file_size_bytes: default_max_file_size(),
            ignore_file: default_ignore_file(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_ignore_file() -> String {
    ".gitignore".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_collection_timeout_secs")]
    pub collection_timeout_secs: u64,
    /// Candidates requested from each collection before the global merge.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            cache_ttl_secs: default_cache_ttl_secs(),
            collection_timeout_secs: default_collection_timeout_secs(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_collection_timeout_secs() -> u64 {
    10
}
fn default_candidate_k() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_batch_size: default_write_batch_size(),
        }
    }
}

fn default_write_batch_size() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A fully-defaulted configuration storing its database under `./data`.
    pub fn minimal() -> Self {
        Self::with_db_path(PathBuf::from("./data/docmem.sqlite"))
    }

    pub fn with_db_path(path: PathBuf) -> Self {
        Self {
            db: DbConfig { path },
            chunking: ChunkingConfig::default(),
            scan: ScanConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.search.max_results < 1 {
            bail!("search.max_results must be >= 1");
        }
        if self.search.candidate_k < 1 {
            bail!("search.candidate_k must be >= 1");
        }
        if self.ingest.write_batch_size < 1 {
            bail!("ingest.write_batch_size must be >= 1");
        }
        if self.embedding.batch_size < 1 {
            bail!("embedding.batch_size must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.is_none() {
                    bail!(
                        "embedding.dims must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        Ok(())
    }
}

/// Written by `docmem init` when no config file exists yet.
pub const SAMPLE_CONFIG: &str = r#"[db]
path = "./data/docmem.sqlite"

[chunking]
chunk_size = 2000
chunk_overlap = 400

[scan]
respect_ignore_file = true
skip_hidden = true
max_file_size_bytes = 1048576
ignore_file = ".gitignore"

[embedding]
# disabled | hash | local | openai | ollama
provider = "local"
batch_size = 64

[search]
max_results = 10
cache_ttl_secs = 300
collection_timeout_secs = 10

[ingest]
write_batch_size = 256

[server]
bind = "127.0.0.1:7341"
"#;

/// Write [`SAMPLE_CONFIG`] to `path` unless a file is already there.
/// Returns `true` if a file was written.
pub fn write_sample_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(true)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
/// A file that exists and fails to parse or validate is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}
