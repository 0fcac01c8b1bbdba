//! Canary controller — drives one service's staged rollout.
//!
//! The controller is the only writer of the service's `CanaryState` and
//! champion record. Every transition (start, advance, rollback, promote)
//! runs under a single async mutex, so concurrent operator requests and
//! decision-loop verdicts are applied one at a time against the latest
//! committed state.
//!
//! ```text
//! start_rollout ─► Stage0 ─► Stage1 ─► Stage2 (100%) ─► Promoted
//!                     │         │
//!                     └─────────┴──────────────────────► RolledBack
//! ```

use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use modelgrid_core::collab::dispatch;
use modelgrid_core::*;
use modelgrid_health::{HealthIngestor, HealthWindow, WindowSummary};
use modelgrid_state::StateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::controller::{evaluate_stage, StageDecision};
use crate::error::{RolloutError, RolloutResult};
use crate::strategy::CanaryConfig;

/// Collaborators the controller talks to.
#[derive(Clone)]
pub struct CanaryDeps {
    pub backend: Arc<dyn DeploymentBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub store: StateStore,
}

/// Canary state plus a summary of the current stage's health window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryStatus {
    #[serde(flatten)]
    pub state: CanaryState,
    pub health: WindowSummary,
}

/// Per-service canary controller. Cheap to clone.
#[derive(Clone)]
pub struct CanaryController {
    inner: Arc<Inner>,
}

struct Inner {
    service: ServiceName,
    config: CanaryConfig,
    retry: RetryPolicy,
    deps: CanaryDeps,
    window: Arc<HealthWindow>,
    ingestor: HealthIngestor,
    state: RwLock<CanaryState>,
    /// Serializes state transitions.
    transition: tokio::sync::Mutex<()>,
    /// Wakes the decision loop of the running rollout.
    abort: Mutex<Option<watch::Sender<bool>>>,
    candidate: Mutex<Option<CandidateModel>>,
    hook: OnceLock<Arc<dyn PromotionHook>>,
}

impl CanaryController {
    /// Create a controller, restoring the last committed state from the store.
    pub fn new(service: &str, config: CanaryConfig, retry: RetryPolicy, deps: CanaryDeps) -> Self {
        let state = match deps.store.get_canary_state(service) {
            Ok(Some(state)) => state,
            Ok(None) => CanaryState::idle(service),
            Err(e) => {
                warn!(service, error = %e, "failed to load canary state");
                CanaryState::idle(service)
            }
        };
        let ingestor = HealthIngestor::new(
            service,
            Arc::clone(&deps.backend),
            config.ingest_interval.as_duration(),
        );
        Self {
            inner: Arc::new(Inner {
                service: service.to_string(),
                window: Arc::new(HealthWindow::new(config.window_capacity)),
                ingestor,
                config,
                retry,
                deps,
                state: RwLock::new(state),
                transition: tokio::sync::Mutex::new(()),
                abort: Mutex::new(None),
                candidate: Mutex::new(None),
                hook: OnceLock::new(),
            }),
        }
    }

    /// Register the callback run when a candidate takes all traffic.
    pub fn set_hook(&self, hook: Arc<dyn PromotionHook>) {
        if self.inner.hook.set(hook).is_err() {
            warn!(service = %self.inner.service, "promotion hook already set");
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.inner.config
    }

    pub fn window(&self) -> Arc<HealthWindow> {
        Arc::clone(&self.inner.window)
    }

    /// Last committed state.
    pub fn state(&self) -> CanaryState {
        self.inner.snapshot()
    }

    pub fn status(&self) -> CanaryStatus {
        let state = self.inner.snapshot();
        let since = if state.stage.is_active() {
            state.entered_stage_at
        } else {
            state.started_at
        };
        CanaryStatus {
            health: self.inner.window.summary(since),
            state,
        }
    }

    /// Shift a first slice of traffic to `candidate` and start observing.
    pub async fn start_rollout(
        &self,
        champion_id: Option<ModelId>,
        candidate: CandidateModel,
    ) -> RolloutResult<CanaryState> {
        let inner = &self.inner;
        let _guard = inner.transition.lock().await;

        let current = inner.snapshot();
        if current.stage.is_active() {
            warn!(
                service = %inner.service,
                stage = ?current.stage,
                candidate = candidate.id(),
                "rollout already active, start rejected"
            );
            return Err(RolloutError::RolloutAlreadyActive {
                service: inner.service.clone(),
                stage: current.stage,
            });
        }

        let weight = inner.config.weight(0).unwrap_or(100);
        let now = inner.deps.clock.now_ms();
        let candidate_id = candidate.id().to_string();
        let state = CanaryState {
            deployment_id: format!("{}-{}-{now}", inner.service, candidate_id),
            service: inner.service.clone(),
            stage: Stage::Stage0,
            traffic_weight: weight,
            champion_id,
            candidate_id: Some(candidate_id.clone()),
            started_at: now,
            entered_stage_at: now,
            last_reason: None,
        };

        inner.window.clear();
        inner.commit(state.clone());
        if let Err(e) = inner.apply_split(weight).await {
            inner
                .rollback_locked(format!("initial traffic split failed: {e}"))
                .await;
            return Err(RolloutError::Backend(e));
        }

        *lock(&inner.candidate) = Some(candidate);
        let (abort_tx, abort_rx) = watch::channel(false);
        *lock(&inner.abort) = Some(abort_tx);
        inner.ingestor.start(Arc::clone(&inner.window));

        info!(
            service = %inner.service,
            deployment = %state.deployment_id,
            candidate = %candidate_id,
            champion = ?state.champion_id,
            weight,
            "canary rollout started"
        );
        tokio::spawn(Arc::clone(inner).run_decision_loop(state.deployment_id.clone(), abort_rx));
        Ok(state)
    }

    /// Operator abort. Preempts the dwell wait and reverts traffic; a no-op
    /// when nothing is in progress. Returns the resulting state.
    pub async fn force_rollback(&self) -> CanaryState {
        if let Some(tx) = lock(&self.inner.abort).take() {
            let _ = tx.send(true);
        }
        self.inner
            .rollback(None, "operator requested rollback".to_string())
            .await;
        self.state()
    }

    /// Roll back a rollout left active by a previous process. Its decision
    /// loop and candidate handle are gone, so it cannot be resumed.
    pub async fn recover(&self) -> bool {
        let _guard = self.inner.transition.lock().await;
        if !self.inner.snapshot().stage.is_active() {
            return false;
        }
        warn!(service = %self.inner.service, "found rollout interrupted by restart");
        self.inner
            .rollback_locked("interrupted by controller restart".to_string())
            .await
    }

    /// Stop background health ingestion (graceful shutdown).
    pub async fn shutdown(&self) {
        if let Some(tx) = lock(&self.inner.abort).take() {
            let _ = tx.send(true);
        }
        self.inner.ingestor.stop();
    }
}

impl RolloutStarter for CanaryController {
    fn start_rollout(
        &self,
        champion_id: Option<ModelId>,
        candidate: CandidateModel,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            CanaryController::start_rollout(self, champion_id, candidate).await?;
            Ok(())
        })
    }
}

impl Inner {
    fn snapshot(&self) -> CanaryState {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn commit(&self, state: CanaryState) {
        if let Err(e) = self.deps.store.put_canary_state(&state) {
            warn!(service = %self.service, error = %e, "failed to persist canary state");
        }
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn run_decision_loop(self: Arc<Self>, deployment_id: String, mut abort: watch::Receiver<bool>) {
        let poll = self.config.poll_interval.as_duration();
        loop {
            let state = self.snapshot();
            if state.deployment_id != deployment_id || !state.stage.is_active() {
                break;
            }
            let Some(index) = state.stage.index() else {
                break;
            };
            if self.config.is_final(index) {
                self.promote(&deployment_id).await;
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = abort.changed() => {
                    debug!(service = %self.service, "decision loop aborted");
                    break;
                }
            }

            let state = self.snapshot();
            if state.deployment_id != deployment_id || !state.stage.is_active() {
                break;
            }
            let in_stage = Duration::from_millis(
                self.deps.clock.now_ms().saturating_sub(state.entered_stage_at),
            );
            let samples = self.window.since(state.entered_stage_at);
            match evaluate_stage(&self.config, &samples, in_stage) {
                StageDecision::Hold => {
                    debug!(
                        service = %self.service,
                        stage = ?state.stage,
                        in_stage_secs = in_stage.as_secs(),
                        samples = samples.len(),
                        "holding canary stage"
                    );
                }
                StageDecision::Advance => self.advance(&deployment_id, state.stage).await,
                StageDecision::Rollback(reason) => {
                    self.rollback(Some(&deployment_id), reason).await;
                    break;
                }
            }
        }
        debug!(service = %self.service, deployment = %deployment_id, "decision loop finished");
    }

    async fn advance(&self, deployment_id: &str, from: Stage) {
        let _guard = self.transition.lock().await;
        let state = self.snapshot();
        if state.deployment_id != deployment_id || state.stage != from {
            debug!(service = %self.service, "stale advance ignored");
            return;
        }
        let Some(next_index) = from.index().map(|i| i + 1) else {
            return;
        };
        let (Some(next), Some(weight)) =
            (Stage::from_index(next_index), self.config.weight(next_index))
        else {
            return;
        };

        match self.apply_split(weight).await {
            Ok(()) => {
                let now = self.deps.clock.now_ms();
                self.commit(CanaryState {
                    stage: next,
                    traffic_weight: weight,
                    entered_stage_at: now,
                    last_reason: Some(format!("advanced from {from:?} after healthy dwell")),
                    ..state
                });
                info!(service = %self.service, stage = ?next, weight, "canary advanced");
            }
            Err(e) => {
                self.rollback_locked(format!("traffic shift to {weight}% failed: {e}"))
                    .await;
            }
        }
    }

    /// Roll back unless a different rollout has started since `expected`
    /// was observed.
    async fn rollback(&self, expected: Option<&str>, reason: String) -> bool {
        let _guard = self.transition.lock().await;
        if let Some(id) = expected
            && self.snapshot().deployment_id != id
        {
            return false;
        }
        self.rollback_locked(reason).await
    }

    /// Caller holds the transition lock.
    async fn rollback_locked(&self, reason: String) -> bool {
        let state = self.snapshot();
        if !state.stage.is_active() {
            debug!(service = %self.service, stage = ?state.stage, "rollback is a no-op");
            return false;
        }
        if let Some(tx) = lock(&self.abort).take() {
            let _ = tx.send(true);
        }

        let from = state.stage;
        let now = self.deps.clock.now_ms();
        // Committed before the revert is sent: a concurrent request sees a
        // terminal state and cannot issue a second revert.
        self.commit(CanaryState {
            stage: Stage::RolledBack,
            traffic_weight: 0,
            entered_stage_at: now,
            last_reason: Some(reason.clone()),
            ..state
        });
        warn!(service = %self.service, from = ?from, reason = %reason, "rolling back canary");

        if let Err(e) = self.apply_split(0).await {
            error!(
                service = %self.service,
                error = %e,
                "revert command failed, candidate may still receive traffic"
            );
        }
        self.ingestor.stop();
        lock(&self.candidate).take();
        self.notify(
            EventKind::RollbackTriggered,
            format!("from={from:?} reason={reason}"),
        )
        .await;
        true
    }

    async fn promote(&self, deployment_id: &str) {
        let _guard = self.transition.lock().await;
        let state = self.snapshot();
        if state.deployment_id != deployment_id || !state.stage.is_active() {
            return;
        }

        let candidate = lock(&self.candidate).take();
        let candidate_id = state.candidate_id.clone().unwrap_or_default();
        let now = self.deps.clock.now_ms();
        let record = ChampionRecord {
            service: self.service.clone(),
            model_id: candidate_id.clone(),
            scorecard: candidate.as_ref().map(|c| c.scorecard.clone()),
            promoted_at: now,
        };
        if let Err(e) = self.deps.store.put_champion(&record) {
            error!(service = %self.service, error = %e, "failed to persist champion record");
        }

        match (candidate, self.hook.get()) {
            (Some(candidate), Some(hook)) => {
                if let Err(e) = hook.on_promoted(candidate).await {
                    warn!(service = %self.service, error = %e, "promotion hook failed");
                }
            }
            (None, _) => warn!(service = %self.service, "candidate handle missing at promotion"),
            (_, None) => debug!(service = %self.service, "no promotion hook registered"),
        }

        let details = format!(
            "candidate={} replaced champion={}",
            candidate_id,
            state.champion_id.as_deref().unwrap_or("none")
        );
        self.commit(CanaryState {
            stage: Stage::Promoted,
            traffic_weight: 100,
            entered_stage_at: now,
            last_reason: Some(format!("{candidate_id} promoted to champion")),
            ..state
        });
        lock(&self.abort).take();
        self.ingestor.stop();

        info!(service = %self.service, champion = %candidate_id, "canary promoted");
        self.notify(EventKind::RolloutPromoted, details).await;
    }

    async fn apply_split(&self, weight: u32) -> CollabResult<()> {
        let split = TrafficSplit::candidate_weight(weight);
        self.retry
            .run("set_traffic_split", move || {
                self.deps.backend.set_traffic_split(&self.service, split)
            })
            .await
    }

    async fn notify(&self, kind: EventKind, details: String) {
        dispatch(
            self.deps.notifier.as_ref(),
            Notification {
                kind,
                service: self.service.clone(),
                details,
                timestamp: self.deps.clock.now_ms(),
            },
        )
        .await;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
