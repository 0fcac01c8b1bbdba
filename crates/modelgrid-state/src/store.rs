//! StateStore — redb-backed persistence for the lifecycle control loop.
//!
//! Log tables are append-only: an entry is never overwritten, and two
//! entries stamped with the same millisecond get distinct keys. Canary
//! states and champions are single-row-per-service tables that hold the
//! last committed value. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use modelgrid_core::types::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            DRIFT_REPORTS,
            BASELINES,
            SCORECARDS,
            DECISIONS,
            CYCLES,
            CANARY_STATES,
            CHAMPIONS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON rows ──────────────────────────────────────────

    fn put<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert under `key`, or under `key-NNNN` if earlier entries already
    /// took it. The padded suffix keeps collisions in insertion order.
    fn append<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<String> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored_key;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let mut candidate = key.to_string();
            let mut n = 0u32;
            while t.get(candidate.as_str()).map_err(map_err!(Read))?.is_some() {
                n += 1;
                candidate = format!("{key}-{n:04}");
            }
            t.insert(candidate.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            stored_key = candidate;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored_key)
    }

    fn get<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every value in key order.
    fn scan_all<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    /// The `limit` newest log entries of a service, newest first. Only
    /// those rows are read.
    fn recent<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        service: &str,
        limit: usize,
    ) -> StateResult<Vec<T>> {
        // Keys are `{service}:…`; ';' sorts right after ':'.
        let (lo, hi) = (format!("{service}:"), format!("{service};"));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(limit.min(64));
        for entry in t.range(lo.as_str()..hi.as_str()).map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Drift reports ──────────────────────────────────────────────

    pub fn append_drift_report(&self, report: &DriftReport) -> StateResult<()> {
        let key = self.append(DRIFT_REPORTS, &report.table_key(), report)?;
        debug!(%key, score = report.score, "drift report stored");
        Ok(())
    }

    pub fn list_drift_reports(&self, service: &str, limit: usize) -> StateResult<Vec<DriftReport>> {
        self.recent(DRIFT_REPORTS, service, limit)
    }

    // ── Baselines ──────────────────────────────────────────────────

    pub fn append_baseline(&self, baseline: &Baseline) -> StateResult<()> {
        let key = self.append(BASELINES, &baseline.table_key(), baseline)?;
        debug!(%key, samples = baseline.sample_count, "baseline stored");
        Ok(())
    }

    /// The active (newest) baseline of a service.
    pub fn latest_baseline(&self, service: &str) -> StateResult<Option<Baseline>> {
        Ok(self.recent(BASELINES, service, 1)?.into_iter().next())
    }

    // ── Scorecards ─────────────────────────────────────────────────

    pub fn put_scorecard(&self, scorecard: &ModelScorecard) -> StateResult<()> {
        self.put(SCORECARDS, &scorecard.model_id, scorecard)
    }

    pub fn get_scorecard(&self, model_id: &str) -> StateResult<Option<ModelScorecard>> {
        self.get(SCORECARDS, model_id)
    }

    // ── Decisions & cycles ─────────────────────────────────────────

    pub fn append_decision(&self, decision: &PromotionDecision) -> StateResult<()> {
        self.append(DECISIONS, &decision.table_key(), decision)?;
        Ok(())
    }

    pub fn list_decisions(&self, service: &str, limit: usize) -> StateResult<Vec<PromotionDecision>> {
        self.recent(DECISIONS, service, limit)
    }

    pub fn append_cycle(&self, cycle: &CycleRecord) -> StateResult<()> {
        self.append(CYCLES, &cycle.table_key(), cycle)?;
        Ok(())
    }

    pub fn list_cycles(&self, service: &str, limit: usize) -> StateResult<Vec<CycleRecord>> {
        self.recent(CYCLES, service, limit)
    }

    // ── Canary states ──────────────────────────────────────────────

    pub fn put_canary_state(&self, state: &CanaryState) -> StateResult<()> {
        self.put(CANARY_STATES, &state.service, state)
    }

    pub fn get_canary_state(&self, service: &str) -> StateResult<Option<CanaryState>> {
        self.get(CANARY_STATES, service)
    }

    pub fn list_canary_states(&self) -> StateResult<Vec<CanaryState>> {
        self.scan_all(CANARY_STATES)
    }

    // ── Champions ──────────────────────────────────────────────────

    pub fn put_champion(&self, champion: &ChampionRecord) -> StateResult<()> {
        self.put(CHAMPIONS, &champion.service, champion)
    }

    pub fn get_champion(&self, service: &str) -> StateResult<Option<ChampionRecord>> {
        self.get(CHAMPIONS, service)
    }
}
