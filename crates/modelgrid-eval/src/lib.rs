//! modelgrid-eval — candidate scoring and promotion decisions.
//!
//! # Components
//!
//! - **`evaluator`** — runs a model over a held-out dataset and produces a
//!   `ModelScorecard` (accuracy, macro precision/recall/F1, latency p95)
//! - **`policy`** — rule set comparing a candidate scorecard against the
//!   champion's, producing a `PromotionDecision`

pub mod error;
pub mod evaluator;
pub mod policy;

pub use error::{EvalError, EvalResult};
pub use evaluator::{classification_metrics, evaluate, percentile};
pub use policy::{compare, PromotionPolicy, Rule};
