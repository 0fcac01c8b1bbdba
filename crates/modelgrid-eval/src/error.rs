//! Evaluator error types.

use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation dataset is empty")]
    EmptyDataset,

    #[error("prediction failed for model {model}: {reason}")]
    Prediction { model: String, reason: String },

    #[error("invalid promotion policy: {0}")]
    InvalidPolicy(String),
}
