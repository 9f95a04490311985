//! Typed errors for conditions callers need to tell apart.
//!
//! Most of the crate returns `anyhow::Result`. The enums here are the errors a
//! caller is expected to downcast and act on: the HTTP layer maps
//! [`StoreError::NotFound`] to 404, and the ingest pipeline aborts a run on
//! any [`EmbeddingError`].

use thiserror::Error;

/// Failures of the embedding capability. Fatal to the enclosing batch.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embeddings are disabled; set [embedding] provider in config")]
    Disabled,

    #[error("embedding model not initialized: {0}")]
    NotInitialized(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned an empty vector")]
    EmptyResponse,

    #[error("embedding provider error: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Failures of the vector store and of lifecycle operations on it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("knowledge base not found: {name}")]
    NotFound { name: String },

    #[error("knowledge base already exists: {name}")]
    AlreadyExists { name: String },

    #[error("invalid knowledge base operation: {0}")]
    Invalid(String),

    #[error("corrupt record in collection {collection}: {message}")]
    Corrupt { collection: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(name: impl Into<String>) -> Self {
        StoreError::NotFound { name: name.into() }
    }
}

/// A request rejected at the HTTP or tool boundary before reaching the core.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidRequest(pub String);

/// Returns true if `err` (or anything in its chain) is a [`StoreError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        )
    })
}
