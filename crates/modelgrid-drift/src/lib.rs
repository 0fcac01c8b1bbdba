//! modelgrid-drift — input drift detection for served models.
//!
//! Embeds recent production traffic, reduces each batch to a centroid and
//! compares it against the centroid of the champion's training data.
//!
//! # Architecture
//!
//! ```text
//! DriftMonitor (one per service)
//!   ├── periodic tick (skipped while an observation is in flight)
//!   │   ├── DataSource::recent_traffic → batch
//!   │   ├── EmbeddingGateway::embed (with retry) → vectors
//!   │   └── cosine_distance(centroid, baseline) → DriftReport
//!   ├── DriftReport appended to the StateStore
//!   └── score > threshold → DriftAlert + RetrainTrigger
//! ```
//!
//! When the embedding service is down the monitor reports itself degraded
//! and skips the observation; it never alerts on data it could not score.

pub mod error;
pub mod monitor;
pub mod summary;

pub use error::{DriftError, DriftResult};
pub use monitor::{DriftConfig, DriftMonitor, TickOutcome};
pub use summary::{cosine_distance, summarize};
