//! modelgrid-state — embedded state store for the model lifecycle loop.
//!
//! Backed by [redb](https://docs.rs/redb), holds the append-only logs
//! (drift reports, baselines, scorecards, promotion decisions, retrain
//! cycles) and the last committed canary state and champion per service.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
