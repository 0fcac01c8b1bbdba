//! Canary controller error types.

use modelgrid_core::{CollaboratorError, Stage};
use modelgrid_state::StateError;
use thiserror::Error;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout already active for {service} (stage {stage:?})")]
    RolloutAlreadyActive { service: String, stage: Stage },

    #[error("deployment backend error: {0}")]
    Backend(#[from] CollaboratorError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("invalid canary config: {0}")]
    InvalidConfig(String),
}
