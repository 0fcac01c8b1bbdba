//! Drift monitor error types.

use thiserror::Error;

pub type DriftResult<T> = Result<T, DriftError>;

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("observation batch is empty")]
    EmptyBatch,

    #[error("embedding vectors are empty")]
    EmptyEmbedding,

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("no baseline installed for service {0}")]
    NoBaseline(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("traffic source unavailable: {0}")]
    SourceUnavailable(String),
}
