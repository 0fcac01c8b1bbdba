//! modelgrid-rollout — staged canary rollouts with health-gated advancement.
//!
//! # Architecture
//!
//! ```text
//! CanaryController (one per service)
//!   ├── start_rollout()   Idle/terminal → Stage0, first traffic slice
//!   ├── decision loop     every poll_interval:
//!   │     window.since(entered_stage_at) → evaluate_stage()
//!   │       Hold | Advance → next weight | Rollback → revert
//!   ├── HealthIngestor    backend → HealthWindow (background)
//!   └── force_rollback()  operator abort, idempotent
//! ```
//!
//! A failed traffic shift always ends in a rollback. The champion record
//! is written only when the final stage is reached.

pub mod canary;
pub mod controller;
pub mod error;
pub mod strategy;

pub use canary::{CanaryController, CanaryDeps, CanaryStatus};
pub use controller::{evaluate_stage, StageDecision};
pub use error::{RolloutError, RolloutResult};
pub use strategy::CanaryConfig;
