//! modelgrid-retrain — the retrain cycle sequencer.
//!
//! Owns "collect data → train → evaluate → decide" for one service and
//! hands promoted candidates to the canary controller through the
//! `RolloutStarter` seam. Implements `RetrainTrigger` so the drift monitor
//! can start cycles without knowing about the orchestrator.

pub mod error;
pub mod orchestrator;

pub use error::{RetrainError, RetrainResult};
pub use orchestrator::{RetrainConfig, RetrainDeps, RetrainOrchestrator, RetrainStatus};
