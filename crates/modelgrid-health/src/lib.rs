//! modelgrid-health — health signal ingestion for canary rollouts.
//!
//! # Architecture
//!
//! ```text
//! HealthIngestor
//!   └── One background task per service
//!       ├── BackoffTracker (consecutive failures, 60s cap)
//!       ├── DeploymentBackend::get_health_samples()
//!       └── HealthWindow::ingest() (bounded ring buffer, dedup by timestamp)
//! ```
//!
//! Samples are never persisted. The canary controller reads the window
//! to decide whether a stage is healthy.

pub mod ingestor;
pub mod tracker;
pub mod window;

pub use ingestor::HealthIngestor;
pub use tracker::BackoffTracker;
pub use window::{HealthWindow, SideStats, WindowSummary};
