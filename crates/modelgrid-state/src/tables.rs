//! redb table definitions for the modelgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Append-only logs are keyed `{service}:{timestamp:020}` so a
//! prefix scan returns one service's entries in time order.

use redb::TableDefinition;

/// Drift reports keyed by `{service}:{timestamp}`.
pub const DRIFT_REPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("drift_reports");

/// Baselines keyed by `{service}:{created_at}`; the newest one is active.
pub const BASELINES: TableDefinition<&str, &[u8]> = TableDefinition::new("baselines");

/// Model scorecards keyed by `{model_id}`.
pub const SCORECARDS: TableDefinition<&str, &[u8]> = TableDefinition::new("scorecards");

/// Promotion decisions keyed by `{service}:{compared_at}`.
pub const DECISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");

/// Finished retrain cycles keyed by `{service}:{started_at}`.
pub const CYCLES: TableDefinition<&str, &[u8]> = TableDefinition::new("cycles");

/// Last committed canary state keyed by `{service}`.
pub const CANARY_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("canary_states");

/// Current champion keyed by `{service}`.
pub const CHAMPIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("champions");
