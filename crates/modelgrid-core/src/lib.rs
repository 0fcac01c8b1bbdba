//! modelgrid-core — shared vocabulary of the model lifecycle control loop.
//!
//! # Components
//!
//! - **`types`** — log entries (drift reports, scorecards, decisions),
//!   canary state, health samples, notifications
//! - **`collab`** — collaborator traits (embedding, training, deployment
//!   backend, notifier, data source) and the seams between components
//! - **`retry`** — bounded exponential backoff for transient failures
//! - **`clock`** — injectable time source
//! - **`duration`** — human-readable durations for config files

pub mod clock;
pub mod collab;
pub mod duration;
pub mod error;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use collab::*;
pub use duration::HumanDuration;
pub use error::{CollabResult, CollaboratorError};
pub use retry::RetryPolicy;
pub use types::*;
