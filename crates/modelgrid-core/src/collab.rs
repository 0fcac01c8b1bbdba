//! Collaborator boundaries.
//!
//! External systems (embedding service, trainer, deployment backend,
//! notification channel, data ingestion) and the seams between the
//! control-loop components are expressed as object-safe traits returning
//! boxed futures, so every component can hold them as `Arc<dyn …>`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CollabResult;
use crate::types::*;

/// Boxed, sendable future used by every collaborator trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── External collaborators ─────────────────────────────────────────

/// Turns raw text into a fixed-length vector.
pub trait EmbeddingGateway: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Vec<f32>>>;
}

/// A single model prediction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub label: u32,
    /// Serving latency for this prediction, in milliseconds.
    pub latency_ms: f64,
}

/// A trained model that can be queried.
pub trait ModelHandle: Send + Sync {
    fn id(&self) -> &str;

    fn predict<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Prediction>>;
}

/// Parameters handed to the trainer. The seed is pinned so that
/// retraining on the same data is reproducible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    pub epochs: u32,
    /// Free-form hyperparameters forwarded verbatim.
    pub params: BTreeMap<String, String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 1,
            params: BTreeMap::new(),
        }
    }
}

/// Long-running model training.
pub trait Trainer: Send + Sync {
    fn train<'a>(
        &'a self,
        service: &'a str,
        dataset: &'a Dataset,
        config: &'a TrainingConfig,
    ) -> BoxFuture<'a, CollabResult<Arc<dyn ModelHandle>>>;
}

/// The serving platform: routes traffic and reports health.
pub trait DeploymentBackend: Send + Sync {
    fn set_traffic_split<'a>(
        &'a self,
        service: &'a str,
        split: TrafficSplit,
    ) -> BoxFuture<'a, CollabResult<()>>;

    fn get_health_samples<'a>(
        &'a self,
        service: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, CollabResult<Vec<HealthSample>>>;
}

/// Fire-and-forget event sink.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, CollabResult<()>>;
}

/// Send a notification, logging (never propagating) delivery failures.
pub async fn dispatch(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification).await {
        warn!(
            service = %notification.service,
            kind = ?notification.kind,
            error = %e,
            "notification delivery failed"
        );
    }
}

/// Output side of the ingestion pipeline.
pub trait DataSource: Send + Sync {
    /// Most recent production inputs, newest last.
    fn recent_traffic<'a>(
        &'a self,
        service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<String>>>;

    /// Freshly labelled examples available for retraining.
    fn labelled_examples<'a>(
        &'a self,
        service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<Example>>>;
}

// ── Component seams ────────────────────────────────────────────────

/// A trained candidate that passed evaluation.
#[derive(Clone)]
pub struct CandidateModel {
    pub model: Arc<dyn ModelHandle>,
    pub scorecard: ModelScorecard,
    /// Data the candidate was trained on; the next baseline is built from it.
    pub training_set: Dataset,
    pub decision: PromotionDecision,
}

impl CandidateModel {
    pub fn id(&self) -> &str {
        self.model.id()
    }
}

impl fmt::Debug for CandidateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateModel")
            .field("model", &self.model.id())
            .field("scorecard", &self.scorecard)
            .field("training_examples", &self.training_set.len())
            .field("decision", &self.decision.verdict)
            .finish()
    }
}

/// Starts retrain cycles. Returns `false` when a cycle is already running
/// and the trigger was dropped.
pub trait RetrainTrigger: Send + Sync {
    fn trigger(&self, reason: TriggerReason) -> bool;
}

/// Accepts promoted candidates for a staged rollout.
pub trait RolloutStarter: Send + Sync {
    fn start_rollout(
        &self,
        champion_id: Option<ModelId>,
        candidate: CandidateModel,
    ) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Invoked once a candidate has taken over all traffic.
pub trait PromotionHook: Send + Sync {
    fn on_promoted(&self, candidate: CandidateModel) -> BoxFuture<'_, anyhow::Result<()>>;
}
