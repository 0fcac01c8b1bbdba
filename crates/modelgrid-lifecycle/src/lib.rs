//! modelgrid-lifecycle — per-service control loops.
//!
//! # Architecture
//!
//! ```text
//! ServiceRegistry
//!   └── ServiceLoop (one per [[service]])
//!       ├── DriftMonitor ──trigger──► RetrainOrchestrator
//!       ├── RetrainOrchestrator ──start_rollout──► CanaryController
//!       └── CanaryController ──on_promoted──► DriftMonitor::rebuild_baseline
//! ```
//!
//! Configuration is loaded from `modelgrid.toml` (`ModelgridConfig`).

pub mod config;
pub mod error;
pub mod registry;
pub mod service;

pub use config::{DaemonConfig, ModelgridConfig, ServiceConfig};
pub use error::{ConfigError, ConfigResult, LifecycleError, LifecycleResult};
pub use registry::ServiceRegistry;
pub use service::{BaselineInfo, Collaborators, DriftStatus, ServiceLoop, ServiceStatus};
