//! One service's control loop: drift monitor → retrain orchestrator →
//! canary controller, wired through the seam traits.

use std::sync::Arc;

use modelgrid_core::*;
use modelgrid_drift::DriftMonitor;
use modelgrid_remote::RemoteCollaborators;
use modelgrid_retrain::{RetrainDeps, RetrainOrchestrator, RetrainStatus};
use modelgrid_rollout::{CanaryController, CanaryDeps, CanaryStatus};
use modelgrid_state::{StateResult, StateStore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::LifecycleResult;

/// External collaborators shared by every service loop.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingGateway>,
    pub trainer: Arc<dyn Trainer>,
    pub backend: Arc<dyn DeploymentBackend>,
    pub source: Arc<dyn DataSource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn from_remote(remote: RemoteCollaborators, clock: Arc<dyn Clock>) -> Self {
        Self {
            embedder: remote.embedder,
            trainer: remote.trainer,
            backend: remote.backend,
            source: remote.source,
            notifier: remote.notifier,
            clock,
        }
    }
}

/// Baseline currently used for drift scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineInfo {
    pub created_at: u64,
    pub sample_count: usize,
    pub model_id: Option<ModelId>,
}

impl From<&Baseline> for BaselineInfo {
    fn from(b: &Baseline) -> Self {
        Self {
            created_at: b.created_at,
            sample_count: b.sample_count,
            model_id: b.model_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftStatus {
    pub threshold: f64,
    pub degraded: bool,
    pub baseline: Option<BaselineInfo>,
    pub last_report: Option<DriftReport>,
}

/// Everything an operator sees for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub name: ServiceName,
    pub champion: Option<ChampionRecord>,
    pub drift: DriftStatus,
    pub retrain: RetrainStatus,
    pub canary: CanaryStatus,
}

/// Rebuilds the drift baseline from a newly promoted model's training data.
struct BaselineRefresh {
    drift: Arc<DriftMonitor>,
}

impl PromotionHook for BaselineRefresh {
    fn on_promoted(&self, candidate: CandidateModel) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let texts = candidate.training_set.texts();
            self.drift
                .rebuild_baseline(&texts, Some(candidate.id()))
                .await?;
            Ok(())
        })
    }
}

/// Control loop of a single service.
pub struct ServiceLoop {
    name: ServiceName,
    config: ServiceConfig,
    drift: Arc<DriftMonitor>,
    retrain: RetrainOrchestrator,
    canary: CanaryController,
    source: Arc<dyn DataSource>,
    store: StateStore,
}

impl ServiceLoop {
    pub fn new(config: ServiceConfig, collab: &Collaborators, store: StateStore) -> Self {
        let name = config.name.clone();

        let drift = Arc::new(
            DriftMonitor::new(
                &name,
                config.drift.clone(),
                Arc::clone(&collab.embedder),
                Arc::clone(&collab.notifier),
                Arc::clone(&collab.clock),
            )
            .with_retry(config.retry.clone())
            .with_store(store.clone()),
        );
        let retrain = RetrainOrchestrator::new(
            &name,
            config.retrain.clone(),
            config.policy.clone(),
            config.retry.clone(),
            RetrainDeps {
                trainer: Arc::clone(&collab.trainer),
                source: Arc::clone(&collab.source),
                notifier: Arc::clone(&collab.notifier),
                clock: Arc::clone(&collab.clock),
                store: store.clone(),
            },
        );
        let canary = CanaryController::new(
            &name,
            config.canary.clone(),
            config.retry.clone(),
            CanaryDeps {
                backend: Arc::clone(&collab.backend),
                notifier: Arc::clone(&collab.notifier),
                clock: Arc::clone(&collab.clock),
                store: store.clone(),
            },
        );

        drift.set_trigger(Arc::new(retrain.clone()));
        retrain.set_rollout(Arc::new(canary.clone()));
        canary.set_hook(Arc::new(BaselineRefresh {
            drift: Arc::clone(&drift),
        }));

        Self {
            name,
            config,
            drift,
            retrain,
            canary,
            source: Arc::clone(&collab.source),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn drift(&self) -> &Arc<DriftMonitor> {
        &self.drift
    }

    pub fn retrain(&self) -> &RetrainOrchestrator {
        &self.retrain
    }

    pub fn canary(&self) -> &CanaryController {
        &self.canary
    }

    pub fn status(&self) -> ServiceStatus {
        let champion = self.store.get_champion(&self.name).unwrap_or_else(|e| {
            warn!(service = %self.name, error = %e, "failed to read champion record");
            None
        });
        ServiceStatus {
            name: self.name.clone(),
            champion,
            drift: DriftStatus {
                threshold: self.config.drift.threshold,
                degraded: self.drift.is_degraded(),
                baseline: self.drift.baseline().map(|b| BaselineInfo::from(b.as_ref())),
                last_report: self.drift.last_report(),
            },
            retrain: self.retrain.status(),
            canary: self.canary.status(),
        }
    }

    /// Operator rollback. Idempotent.
    pub async fn force_rollback(&self) -> CanaryState {
        self.canary.force_rollback().await
    }

    /// Operator retrain. `false` when a cycle is already running.
    pub fn force_retrain(&self) -> bool {
        self.retrain.force_retrain()
    }

    /// Seed or replace the drift baseline from reference texts. Blank
    /// lines are skipped; the new baseline is persisted and has no model.
    pub async fn rebuild_baseline(&self, texts: &[String]) -> LifecycleResult<BaselineInfo> {
        let texts: Vec<String> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let baseline = self.drift.rebuild_baseline(&texts, None).await?;
        info!(service = %self.name, samples = baseline.sample_count, "operator baseline installed");
        Ok(BaselineInfo::from(baseline.as_ref()))
    }

    /// Newest drift reports first.
    pub fn drift_history(&self, limit: usize) -> StateResult<Vec<DriftReport>> {
        self.store.list_drift_reports(&self.name, limit)
    }

    /// Newest promotion decisions first.
    pub fn decisions(&self, limit: usize) -> StateResult<Vec<PromotionDecision>> {
        self.store.list_decisions(&self.name, limit)
    }

    pub fn cycles(&self, limit: usize) -> StateResult<Vec<CycleRecord>> {
        self.store.list_cycles(&self.name, limit)
    }

    /// Roll back a rollout interrupted by a restart, then start the drift
    /// timer and the retrain schedule.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if self.canary.recover().await {
            warn!(service = %self.name, "interrupted rollout rolled back on startup");
        }

        let mut handles = Vec::with_capacity(2);
        handles.push(tokio::spawn(
            Arc::clone(&self.drift).run(Arc::clone(&self.source), shutdown.clone()),
        ));
        if self.config.retrain.schedule.is_some() {
            handles.push(tokio::spawn(self.retrain.clone().run_schedule(shutdown)));
        }
        info!(service = %self.name, "service loop started");
        handles
    }

    /// Stop background health ingestion.
    pub async fn shutdown(&self) {
        self.canary.shutdown().await;
    }
}
