//! Errors reported by external collaborators.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Failures crossing the boundary to an external collaborator.
///
/// Only the transient variants are retried; everything else is reported
/// to the caller on the first occurrence.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("training failed: {0}")]
    TrainingFailed(String),

    #[error("prediction failed: {0}")]
    PredictionFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("notification failed: {0}")]
    NotifyFailed(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::EmbeddingUnavailable(_)
                | CollaboratorError::BackendUnavailable(_)
                | CollaboratorError::DataUnavailable(_)
        )
    }
}
