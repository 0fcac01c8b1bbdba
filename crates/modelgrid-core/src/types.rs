//! Domain types shared by every modelgrid component.
//!
//! Log entries (`DriftReport`, `ModelScorecard`, `PromotionDecision`,
//! `CycleRecord`) are immutable once produced. `CanaryState` is the only
//! mutable record and is owned by the canary controller of its service.
//! All types serialize to JSON for the state store and the REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical service name; every control loop is keyed by it.
pub type ServiceName = String;

/// Identifier of a trained model version.
pub type ModelId = String;

// ── Drift ──────────────────────────────────────────────────────────

/// Aggregate of a set of embedding vectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorSummary {
    /// Component-wise mean of the vectors.
    pub centroid: Vec<f32>,
    /// Number of vectors aggregated.
    pub count: usize,
}

impl VectorSummary {
    /// Dimension of the summarized vectors.
    pub fn dim(&self) -> usize {
        self.centroid.len()
    }
}

/// Immutable snapshot of "normal" traffic for a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub service: ServiceName,
    pub summary: VectorSummary,
    /// Unix timestamp (milliseconds).
    pub created_at: u64,
    pub sample_count: usize,
    /// Model whose training set produced this baseline, if known.
    pub model_id: Option<ModelId>,
}

impl Baseline {
    /// Store key: `{service}:{created_at}` (zero-padded so keys sort by time).
    pub fn table_key(&self) -> String {
        log_key(&self.service, self.created_at)
    }
}

/// Result of scoring one traffic batch against the baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftReport {
    pub service: ServiceName,
    pub timestamp: u64,
    /// Cosine distance between batch centroid and baseline centroid.
    pub score: f64,
    pub mean_similarity: f64,
    pub sample_count: usize,
    pub threshold: f64,
    pub exceeded_threshold: bool,
}

impl DriftReport {
    pub fn table_key(&self) -> String {
        log_key(&self.service, self.timestamp)
    }
}

// ── Training & evaluation ─────────────────────────────────────────

/// A labelled text example.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Example {
    pub text: String,
    pub label: u32,
}

/// An ordered collection of labelled examples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    pub examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Texts of every example, in order.
    pub fn texts(&self) -> Vec<String> {
        self.examples.iter().map(|e| e.text.clone()).collect()
    }

    /// Deterministic train/holdout split.
    ///
    /// Every k-th example (k = round(1 / fraction)) goes to the holdout set,
    /// starting with the first one. Fractions above 2/3 would give k = 1 and
    /// leave nothing to train on, so k is never below 2; configuration
    /// validation rejects that range.
    pub fn split_holdout(&self, fraction: f64) -> (Dataset, Dataset) {
        let stride = if fraction > 0.0 {
            ((1.0 / fraction).round() as usize).max(2)
        } else {
            usize::MAX
        };
        let mut train = Vec::new();
        let mut holdout = Vec::new();
        for (i, example) in self.examples.iter().enumerate() {
            if i % stride == 0 {
                holdout.push(example.clone());
            } else {
                train.push(example.clone());
            }
        }
        (Dataset::new(train), Dataset::new(holdout))
    }
}

/// Evaluation metrics for one model version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelScorecard {
    pub model_id: ModelId,
    pub metrics: BTreeMap<String, f64>,
    pub computed_at: u64,
    /// Number of held-out examples the metrics were computed on.
    pub sample_count: usize,
}

impl ModelScorecard {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Outcome of comparing a candidate against the champion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Promote,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromotionDecision {
    pub service: ServiceName,
    pub candidate_id: ModelId,
    pub champion_id: Option<ModelId>,
    pub verdict: Verdict,
    pub reason: String,
    /// Human-readable description of every rule that failed.
    pub failed_rules: Vec<String>,
    pub compared_at: u64,
}

impl PromotionDecision {
    pub fn table_key(&self) -> String {
        log_key(&self.service, self.compared_at)
    }

    pub fn is_promote(&self) -> bool {
        self.verdict == Verdict::Promote
    }
}

/// The model currently serving a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChampionRecord {
    pub service: ServiceName,
    pub model_id: ModelId,
    pub scorecard: Option<ModelScorecard>,
    pub promoted_at: u64,
}

// ── Retrain cycles ────────────────────────────────────────────────

/// Phase of the retrain orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrainPhase {
    Idle,
    Collecting,
    Training,
    Evaluating,
    Promoted,
    Rejected,
}

/// Why a retrain cycle was started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerReason {
    Drift { score: f64 },
    Schedule,
    Operator,
}

/// How a retrain cycle ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleOutcome {
    Promoted { candidate_id: ModelId },
    Rejected { candidate_id: ModelId, reason: String },
    Failed { phase: RetrainPhase, error: String },
}

/// Append-only record of one finished retrain cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub service: ServiceName,
    pub reason: TriggerReason,
    pub started_at: u64,
    pub finished_at: u64,
    pub outcome: CycleOutcome,
    /// Collected examples dropped by validation (empty text, unknown label).
    #[serde(default)]
    pub invalid_examples: usize,
}

impl CycleRecord {
    pub fn table_key(&self) -> String {
        log_key(&self.service, self.started_at)
    }
}

// ── Canary rollout ────────────────────────────────────────────────

/// Stage of a canary rollout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Stage0,
    Stage1,
    Stage2,
    Promoted,
    RolledBack,
}

impl Stage {
    /// Stages that count as an in-progress rollout.
    pub fn is_active(self) -> bool {
        matches!(self, Stage::Stage0 | Stage::Stage1 | Stage::Stage2)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Promoted | Stage::RolledBack)
    }

    /// Position of an active stage in the configured weight list.
    pub fn index(self) -> Option<usize> {
        match self {
            Stage::Stage0 => Some(0),
            Stage::Stage1 => Some(1),
            Stage::Stage2 => Some(2),
            _ => None,
        }
    }

    pub fn from_index(index: usize) -> Option<Stage> {
        match index {
            0 => Some(Stage::Stage0),
            1 => Some(Stage::Stage1),
            2 => Some(Stage::Stage2),
            _ => None,
        }
    }
}

/// Per-service canary state. Only the canary controller writes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryState {
    pub deployment_id: String,
    pub service: ServiceName,
    pub stage: Stage,
    /// Percentage of traffic routed to the candidate (0-100).
    pub traffic_weight: u32,
    pub champion_id: Option<ModelId>,
    pub candidate_id: Option<ModelId>,
    pub started_at: u64,
    pub entered_stage_at: u64,
    /// Why the last transition happened (rollback reason, promotion note).
    pub last_reason: Option<String>,
}

impl CanaryState {
    /// The state of a service that has never rolled anything out.
    pub fn idle(service: &str) -> Self {
        Self {
            deployment_id: String::new(),
            service: service.to_string(),
            stage: Stage::Idle,
            traffic_weight: 0,
            champion_id: None,
            candidate_id: None,
            started_at: 0,
            entered_stage_at: 0,
            last_reason: None,
        }
    }
}

/// Which side of the traffic split a health sample describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Champion,
    Candidate,
}

/// One health observation reported by the deployment backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    pub timestamp: u64,
    /// Fraction of failed requests (0.0-1.0).
    pub error_rate: f64,
    /// p95 latency in milliseconds.
    pub latency_p95: f64,
    pub source: SampleSource,
}

/// Two-way traffic weights, in percent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficSplit {
    pub champion: u32,
    pub candidate: u32,
}

impl TrafficSplit {
    /// Split routing `weight` percent to the candidate.
    pub fn candidate_weight(weight: u32) -> Self {
        let weight = weight.min(100);
        Self {
            champion: 100 - weight,
            candidate: weight,
        }
    }

    /// All traffic back on the champion.
    pub fn revert() -> Self {
        Self::candidate_weight(0)
    }
}

// ── Notifications ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DriftAlert,
    PromotionDecision,
    RollbackTriggered,
    RetrainFailed,
    RolloutPromoted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub service: ServiceName,
    pub details: String,
    pub timestamp: u64,
}

impl Notification {
    /// One-line rendering used by log and chat notifiers.
    pub fn message(&self) -> String {
        let tag = match self.kind {
            EventKind::DriftAlert => "DRIFT ALERT",
            EventKind::PromotionDecision => "PROMOTION DECISION",
            EventKind::RollbackTriggered => "ROLLBACK",
            EventKind::RetrainFailed => "RETRAIN FAILED",
            EventKind::RolloutPromoted => "PROMOTED",
        };
        format!("[{}] {}: {}", self.service, tag, self.details)
    }
}

/// Key for append-only per-service logs: `{service}:{timestamp:020}`.
pub fn log_key(service: &str, timestamp: u64) -> String {
    format!("{service}:{timestamp:020}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: u32) -> Dataset {
        Dataset::new(
            (0..n)
                .map(|i| Example {
                    text: format!("t{i}"),
                    label: i % 2,
                })
                .collect(),
        )
    }

    #[test]
    fn holdout_split_is_deterministic() {
        let ds = dataset(10);
        let (train, holdout) = ds.split_holdout(0.2);
        assert_eq!(holdout.len(), 2);
        assert_eq!(train.len(), 8);
        assert_eq!(holdout.examples[0].text, "t0");
        assert_eq!(holdout.examples[1].text, "t5");
        assert_eq!(ds.split_holdout(0.2), (train, holdout));
    }

    #[test]
    fn stage_classification() {
        assert!(Stage::Stage1.is_active());
        assert!(!Stage::Idle.is_active());
        assert!(Stage::RolledBack.is_terminal());
        assert_eq!(Stage::from_index(2), Some(Stage::Stage2));
        assert_eq!(Stage::Stage2.index(), Some(2));
        assert_eq!(Stage::from_index(3), None);
    }

    #[test]
    fn traffic_split_weights_sum_to_100() {
        let split = TrafficSplit::candidate_weight(10);
        assert_eq!(split.champion, 90);
        assert_eq!(split.candidate, 10);
        assert_eq!(TrafficSplit::candidate_weight(150).champion, 0);
        assert_eq!(TrafficSplit::revert().candidate, 0);
    }

    #[test]
    fn log_keys_sort_by_time() {
        assert!(log_key("svc", 99) < log_key("svc", 100));
    }
}
