//! Retrain orchestrator error types.

use modelgrid_eval::EvalError;
use modelgrid_state::StateError;
use thiserror::Error;

pub type RetrainResult<T> = Result<T, RetrainError>;

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("not enough labelled data: have {have}, need {need}")]
    DataUnavailable { have: usize, need: usize },

    #[error("data source error: {0}")]
    Source(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("rollout rejected candidate: {0}")]
    Rollout(String),

    #[error("invalid retrain config: {0}")]
    InvalidConfig(String),
}
