//! Retrain orchestrator — one retrain cycle at a time per service.
//!
//! ```text
//! Idle → Collecting → Training → Evaluating → Promoted | Rejected → Idle
//! ```
//!
//! A trigger (drift alert, schedule tick or operator request) moves an idle
//! orchestrator to `Collecting` and runs the rest of the cycle on its own
//! task. Triggers arriving while a cycle is in flight are dropped. Every
//! cycle ends back in `Idle` with a `CycleRecord` appended to the store,
//! whatever happened along the way, including a panic inside a
//! collaborator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use modelgrid_core::collab::dispatch;
use modelgrid_core::*;
use modelgrid_eval::{compare, evaluate, PromotionPolicy};
use modelgrid_state::StateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{RetrainError, RetrainResult};

/// Retrain cycle settings for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrainConfig {
    /// Labelled examples required before training starts.
    pub min_samples: usize,
    /// Upper bound on examples pulled for one cycle.
    pub max_samples: usize,
    /// Give up collecting after this long.
    pub collect_deadline: HumanDuration,
    /// Time between data source polls while collecting.
    pub collect_poll: HumanDuration,
    /// Share of collected examples held out for evaluation.
    pub holdout_fraction: f64,
    /// Periodic retrain interval; no scheduled retrains when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<HumanDuration>,
    /// Labels a collected example may carry; any label when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_labels: Vec<u32>,
    pub training: TrainingConfig,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            min_samples: 200,
            max_samples: 5000,
            collect_deadline: HumanDuration::from_secs(30 * 60),
            collect_poll: HumanDuration::from_secs(30),
            holdout_fraction: 0.2,
            schedule: None,
            allowed_labels: Vec::new(),
            training: TrainingConfig::default(),
        }
    }
}

impl RetrainConfig {
    pub fn validate(&self) -> RetrainResult<()> {
        if self.min_samples == 0 {
            return Err(RetrainError::InvalidConfig("min_samples must be > 0".into()));
        }
        if self.min_samples > self.max_samples {
            return Err(RetrainError::InvalidConfig(format!(
                "min_samples ({}) exceeds max_samples ({})",
                self.min_samples, self.max_samples
            )));
        }
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return Err(RetrainError::InvalidConfig(format!(
                "holdout_fraction must be in (0, 1), got {}",
                self.holdout_fraction
            )));
        }
        if (1.0 / self.holdout_fraction).round() < 2.0 {
            return Err(RetrainError::InvalidConfig(format!(
                "holdout_fraction {} would hold out every example, use at most 2/3",
                self.holdout_fraction
            )));
        }
        if self.collect_poll.as_duration().is_zero() {
            return Err(RetrainError::InvalidConfig("collect_poll must be > 0".into()));
        }
        if self.schedule.is_some_and(|s| s.as_duration().is_zero()) {
            return Err(RetrainError::InvalidConfig("schedule must be > 0".into()));
        }
        Ok(())
    }
}

/// Collaborators a retrain cycle talks to.
#[derive(Clone)]
pub struct RetrainDeps {
    pub trainer: Arc<dyn Trainer>,
    pub source: Arc<dyn DataSource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub store: StateStore,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrainStatus {
    pub phase: RetrainPhase,
    pub active_reason: Option<TriggerReason>,
    pub cycle_started_at: Option<u64>,
    pub last_cycle: Option<CycleRecord>,
}

/// Per-service retrain orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct RetrainOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    service: ServiceName,
    config: RetrainConfig,
    policy: PromotionPolicy,
    retry: RetryPolicy,
    deps: RetrainDeps,
    rollout: OnceLock<Arc<dyn RolloutStarter>>,
    phase: watch::Sender<RetrainPhase>,
    active: RwLock<Option<(TriggerReason, u64)>>,
    last_cycle: RwLock<Option<CycleRecord>>,
    /// Examples the current cycle dropped during collection.
    invalid_examples: AtomicUsize,
}

impl RetrainOrchestrator {
    pub fn new(
        service: &str,
        config: RetrainConfig,
        policy: PromotionPolicy,
        retry: RetryPolicy,
        deps: RetrainDeps,
    ) -> Self {
        let last_cycle = match deps.store.list_cycles(service, 1) {
            Ok(mut cycles) => cycles.pop(),
            Err(e) => {
                warn!(service, error = %e, "failed to load last retrain cycle");
                None
            }
        };
        let (phase, _) = watch::channel(RetrainPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                service: service.to_string(),
                config,
                policy,
                retry,
                deps,
                rollout: OnceLock::new(),
                phase,
                active: RwLock::new(None),
                last_cycle: RwLock::new(last_cycle),
                invalid_examples: AtomicUsize::new(0),
            }),
        }
    }

    /// Connect the canary controller. Only the first call has an effect.
    pub fn set_rollout(&self, rollout: Arc<dyn RolloutStarter>) {
        if self.inner.rollout.set(rollout).is_err() {
            warn!(service = %self.inner.service, "rollout starter already connected");
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn phase(&self) -> RetrainPhase {
        *self.inner.phase.borrow()
    }

    pub fn status(&self) -> RetrainStatus {
        let active = read(&self.inner.active).clone();
        RetrainStatus {
            phase: self.phase(),
            active_reason: active.as_ref().map(|(r, _)| r.clone()),
            cycle_started_at: active.map(|(_, at)| at),
            last_cycle: read(&self.inner.last_cycle).clone(),
        }
    }

    /// Operator-requested retrain. Returns `false` if a cycle is already running.
    pub fn force_retrain(&self) -> bool {
        self.trigger(TriggerReason::Operator)
    }

    /// Wait until no cycle is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|p| *p == RetrainPhase::Idle).await;
    }

    /// Fire `Schedule` triggers at the configured interval until shutdown.
    /// Returns immediately when no schedule is configured.
    pub async fn run_schedule(self, mut shutdown: watch::Receiver<bool>) {
        let Some(every) = self.inner.config.schedule else {
            return;
        };
        let period = every.as_duration().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        info!(service = %self.inner.service, every = %every, "retrain schedule started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.trigger(TriggerReason::Schedule);
                }
                _ = shutdown.changed() => {
                    debug!(service = %self.inner.service, "retrain schedule stopped");
                    break;
                }
            }
        }
    }
}

impl RetrainTrigger for RetrainOrchestrator {
    fn trigger(&self, reason: TriggerReason) -> bool {
        let started = self.inner.phase.send_if_modified(|phase| {
            if *phase == RetrainPhase::Idle {
                *phase = RetrainPhase::Collecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(
                service = %self.inner.service,
                reason = ?reason,
                phase = ?self.phase(),
                "retrain cycle in flight, trigger dropped"
            );
            return false;
        }

        let started_at = self.inner.deps.clock.now_ms();
        *write(&self.inner.active) = Some((reason.clone(), started_at));
        info!(service = %self.inner.service, reason = ?reason, "retrain cycle started");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_cycle(reason, started_at));
        true
    }
}

impl Inner {
    /// Run one cycle on its own task and record how it ended. The cycle
    /// body is a separate task so a panic in a collaborator still records
    /// a failed cycle and returns the orchestrator to `Idle`.
    async fn run_cycle(self: Arc<Self>, reason: TriggerReason, started_at: u64) {
        self.invalid_examples.store(0, Ordering::SeqCst);
        let worker = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { worker.execute().await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.failed(e.to_string()).await,
            Err(e) => self.failed(format!("cycle task aborted: {e}")).await,
        };

        let record = CycleRecord {
            service: self.service.clone(),
            reason,
            started_at,
            finished_at: self.deps.clock.now_ms(),
            outcome,
            invalid_examples: self.invalid_examples.load(Ordering::SeqCst),
        };
        if let Err(e) = self.deps.store.append_cycle(&record) {
            warn!(service = %self.service, error = %e, "failed to persist retrain cycle");
        }
        *write(&self.last_cycle) = Some(record);
        *write(&self.active) = None;
        self.phase.send_replace(RetrainPhase::Idle);
        debug!(service = %self.service, "retrain orchestrator idle");
    }

    async fn execute(&self) -> RetrainResult<CycleOutcome> {
        let examples = self.collect().await?;
        let collected = examples.len();
        let (train, holdout) = Dataset::new(examples).split_holdout(self.config.holdout_fraction);
        if train.is_empty() || holdout.is_empty() {
            return Err(RetrainError::DataUnavailable {
                have: collected,
                need: self.config.min_samples,
            });
        }

        self.set_phase(RetrainPhase::Training);
        info!(
            service = %self.service,
            train = train.len(),
            holdout = holdout.len(),
            seed = self.config.training.seed,
            "training candidate"
        );
        let train_set = &train;
        let model = self
            .retry
            .run("train", move || {
                self.deps
                    .trainer
                    .train(&self.service, train_set, &self.config.training)
            })
            .await
            .map_err(|e| RetrainError::Training(e.to_string()))?;

        self.set_phase(RetrainPhase::Evaluating);
        let scorecard = evaluate(model.as_ref(), &holdout, self.deps.clock.now_ms()).await?;
        if let Err(e) = self.deps.store.put_scorecard(&scorecard) {
            warn!(service = %self.service, error = %e, "failed to persist scorecard");
        }

        let champion = self.deps.store.get_champion(&self.service)?;
        let decision = compare(
            &self.service,
            &scorecard,
            champion.as_ref(),
            &self.policy,
            self.deps.clock.now_ms(),
        );
        if let Err(e) = self.deps.store.append_decision(&decision) {
            warn!(service = %self.service, error = %e, "failed to persist promotion decision");
        }
        self.notify(
            EventKind::PromotionDecision,
            format!(
                "candidate={} verdict={:?} reason={}",
                decision.candidate_id, decision.verdict, decision.reason
            ),
        )
        .await;

        let candidate_id = scorecard.model_id.clone();
        if !decision.is_promote() {
            self.set_phase(RetrainPhase::Rejected);
            info!(service = %self.service, candidate = %candidate_id, reason = %decision.reason, "candidate rejected");
            return Ok(CycleOutcome::Rejected {
                candidate_id,
                reason: decision.reason,
            });
        }

        self.set_phase(RetrainPhase::Promoted);
        let rollout = self
            .rollout
            .get()
            .ok_or_else(|| RetrainError::Rollout("no rollout controller connected".into()))?;
        let candidate = CandidateModel {
            model,
            scorecard,
            training_set: train,
            decision,
        };
        rollout
            .start_rollout(champion.map(|c| c.model_id), candidate)
            .await
            .map_err(|e| RetrainError::Rollout(e.to_string()))?;

        info!(service = %self.service, candidate = %candidate_id, "candidate handed to canary rollout");
        Ok(CycleOutcome::Promoted { candidate_id })
    }

    /// Poll the data source until enough labelled examples exist or the
    /// collection deadline passes.
    async fn collect(&self) -> RetrainResult<Vec<Example>> {
        let need = self.config.min_samples;
        let deadline = Instant::now() + self.config.collect_deadline.as_duration();
        loop {
            let have = match self
                .retry
                .run("labelled_examples", move || {
                    self.deps
                        .source
                        .labelled_examples(&self.service, self.config.max_samples)
                })
                .await
            {
                Ok(examples) => {
                    let mut valid = self.drop_invalid(examples);
                    if valid.len() >= need {
                        valid.truncate(self.config.max_samples);
                        debug!(service = %self.service, collected = valid.len(), "labelled data collected");
                        return Ok(valid);
                    }
                    valid.len()
                }
                Err(e) => {
                    warn!(service = %self.service, error = %e, "data source poll failed");
                    0
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RetrainError::DataUnavailable { have, need });
            }
            debug!(service = %self.service, have, need, "waiting for labelled data");
            let wait = self.config.collect_poll.as_duration().min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// Keep examples with non-blank text and, when configured, an allowed
    /// label.
    fn drop_invalid(&self, examples: Vec<Example>) -> Vec<Example> {
        let total = examples.len();
        let allowed = &self.config.allowed_labels;
        let valid: Vec<Example> = examples
            .into_iter()
            .filter(|ex| {
                !ex.text.trim().is_empty() && (allowed.is_empty() || allowed.contains(&ex.label))
            })
            .collect();
        let invalid = total - valid.len();
        self.invalid_examples.store(invalid, Ordering::SeqCst);
        if invalid > 0 {
            warn!(service = %self.service, invalid, total, "dropping invalid labelled examples");
        }
        valid
    }

    async fn failed(&self, error: String) -> CycleOutcome {
        let phase = *self.phase.borrow();
        error!(service = %self.service, phase = ?phase, error = %error, "retrain cycle failed");
        self.notify(EventKind::RetrainFailed, format!("phase={phase:?} error={error}"))
            .await;
        CycleOutcome::Failed { phase, error }
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

    fn set_phase(&self, phase: RetrainPhase) {
        debug!(service = %self.service, phase = ?phase, "retrain phase");
        self.phase.send_replace(phase);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_core::testing::{FakeDataSource, FakeTrainer, ManualClock, RecordingNotifier};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Rollout starter that records candidates, optionally refusing them.
    #[derive(Default)]
    struct RecordingRollout {
        started: Mutex<Vec<(Option<ModelId>, String)>>,
        refuse: bool,
    }

    impl RolloutStarter for RecordingRollout {
        fn start_rollout(
            &self,
            champion_id: Option<ModelId>,
            candidate: CandidateModel,
        ) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async move {
                if self.refuse {
                    anyhow::bail!("rollout already active");
                }
                self.started
                    .lock()
                    .unwrap()
                    .push((champion_id, candidate.id().to_string()));
                Ok(())
            })
        }
    }

    /// Examples that all carry label 0, so an untrained fake model scores
    /// perfectly on the holdout split.
    fn examples(prefix: &str, n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example {
                text: format!("{prefix}-{i}"),
                label: 0,
            })
            .collect()
    }

    struct Harness {
        orchestrator: RetrainOrchestrator,
        trainer: Arc<FakeTrainer>,
        source: Arc<FakeDataSource>,
        notifier: Arc<RecordingNotifier>,
        rollout: Arc<RecordingRollout>,
        store: StateStore,
    }

    fn config() -> RetrainConfig {
        RetrainConfig {
            min_samples: 50,
            max_samples: 100,
            collect_deadline: HumanDuration::from_secs(60),
            collect_poll: HumanDuration::from_secs(10),
            ..Default::default()
        }
    }

    fn harness_with(config: RetrainConfig, trainer: FakeTrainer, rollout: RecordingRollout) -> Harness {
        let trainer = Arc::new(trainer);
        let source = Arc::new(FakeDataSource::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let rollout = Arc::new(rollout);
        let store = StateStore::open_in_memory().unwrap();
        let orchestrator = RetrainOrchestrator::new(
            "qa",
            config,
            PromotionPolicy::default(),
            RetryPolicy::immediate(2),
            RetrainDeps {
                trainer: trainer.clone(),
                source: source.clone(),
                notifier: notifier.clone(),
                clock: Arc::new(ManualClock::at(1_000)),
                store: store.clone(),
            },
        );
        orchestrator.set_rollout(rollout.clone());
        Harness {
            orchestrator,
            trainer,
            source,
            notifier,
            rollout,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), FakeTrainer::new(50.0), RecordingRollout::default())
    }

    fn last_outcome(h: &Harness) -> CycleOutcome {
        h.orchestrator.status().last_cycle.unwrap().outcome
    }

    #[tokio::test(start_paused = true)]
    async fn first_candidate_is_promoted_and_handed_to_rollout() {
        let h = harness();
        h.source.set_examples(examples("ex", 80));

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        assert_eq!(
            last_outcome(&h),
            CycleOutcome::Promoted {
                candidate_id: "qa-v1".into()
            }
        );
        let started = h.rollout.started.lock().unwrap().clone();
        assert_eq!(started, vec![(None, "qa-v1".to_string())]);

        let decisions = h.store.list_decisions("qa", 10).unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].is_promote());
        assert!(h.store.get_scorecard("qa-v1").unwrap().is_some());
        assert_eq!(h.store.list_cycles("qa", 10).unwrap().len(), 1);
        assert_eq!(h.notifier.count(EventKind::PromotionDecision), 1);
        assert_eq!(h.orchestrator.phase(), RetrainPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_candidate_does_not_start_rollout() {
        let h = harness();
        h.source.set_examples(examples("ex", 80));
        // Champion is far faster than the 50ms fake candidate.
        h.store
            .put_champion(&ChampionRecord {
                service: "qa".into(),
                model_id: "qa-v0".into(),
                scorecard: Some(ModelScorecard {
                    model_id: "qa-v0".into(),
                    metrics: BTreeMap::from([
                        ("accuracy".to_string(), 1.0),
                        ("latency_p95".to_string(), 10.0),
                    ]),
                    computed_at: 0,
                    sample_count: 20,
                }),
                promoted_at: 0,
            })
            .unwrap();

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        match last_outcome(&h) {
            CycleOutcome::Rejected { reason, .. } => assert!(reason.contains("latency_p95")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(h.rollout.started.lock().unwrap().is_empty());
        let decision = &h.store.list_decisions("qa", 1).unwrap()[0];
        assert_eq!(decision.champion_id.as_deref(), Some("qa-v0"));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_while_cycle_in_flight_is_dropped() {
        let (trainer, gate) = FakeTrainer::gated(50.0);
        let h = harness_with(config(), trainer, RecordingRollout::default());
        h.source.set_examples(examples("ex", 80));

        assert!(h.orchestrator.trigger(TriggerReason::Drift { score: 0.3 }));
        while h.orchestrator.phase() != RetrainPhase::Training {
            tokio::task::yield_now().await;
        }
        assert!(!h.orchestrator.trigger(TriggerReason::Drift { score: 0.4 }));
        assert!(!h.orchestrator.force_retrain());
        assert_eq!(
            h.orchestrator.status().active_reason,
            Some(TriggerReason::Drift { score: 0.3 })
        );

        gate.add_permits(1);
        h.orchestrator.wait_idle().await;
        assert_eq!(h.trainer.calls(), 1);
        assert_eq!(h.store.list_cycles("qa", 10).unwrap().len(), 1);
        assert!(h.orchestrator.status().active_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn collection_times_out_without_enough_data() {
        let h = harness();
        h.source.set_examples(examples("ex", 10));

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        match last_outcome(&h) {
            CycleOutcome::Failed { phase, error } => {
                assert_eq!(phase, RetrainPhase::Collecting);
                assert!(error.contains("have 10, need 50"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.trainer.calls(), 0);
        assert_eq!(h.notifier.count(EventKind::RetrainFailed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn collection_waits_for_late_data() {
        let h = harness();
        h.source.set_examples(examples("early", 20));

        assert!(h.orchestrator.force_retrain());
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.orchestrator.phase(), RetrainPhase::Collecting);
        h.source.push_examples(examples("late", 40));
        h.orchestrator.wait_idle().await;

        assert!(matches!(last_outcome(&h), CycleOutcome::Promoted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn training_failure_returns_to_idle() {
        let h = harness();
        h.source.set_examples(examples("ex", 80));
        h.trainer.set_fail(true);

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        assert!(matches!(
            last_outcome(&h),
            CycleOutcome::Failed {
                phase: RetrainPhase::Training,
                ..
            }
        ));
        assert_eq!(h.notifier.count(EventKind::RetrainFailed), 1);

        // The next trigger starts a fresh cycle.
        h.trainer.set_fail(false);
        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;
        assert!(matches!(last_outcome(&h), CycleOutcome::Promoted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_trainer_fails_cycle_and_returns_to_idle() {
        let h = harness();
        h.source.set_examples(examples("ex", 80));
        h.trainer.set_panic(true);

        assert!(h.orchestrator.force_retrain());
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(h.orchestrator.phase(), RetrainPhase::Idle);

        match last_outcome(&h) {
            CycleOutcome::Failed { phase, error } => {
                assert_eq!(phase, RetrainPhase::Training);
                assert!(error.contains("aborted"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.notifier.count(EventKind::RetrainFailed), 1);
        assert!(h.orchestrator.status().active_reason.is_none());

        h.trainer.set_panic(false);
        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;
        assert!(matches!(last_outcome(&h), CycleOutcome::Promoted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_examples_are_dropped_before_training() {
        let h = harness_with(
            RetrainConfig {
                allowed_labels: vec![0, 1],
                ..config()
            },
            FakeTrainer::new(50.0),
            RecordingRollout::default(),
        );
        let mut data = examples("ex", 60);
        data.extend((0..10).map(|_| Example {
            text: "   ".into(),
            label: 0,
        }));
        data.extend((0..10).map(|i| Example {
            text: format!("odd-{i}"),
            label: 7,
        }));
        h.source.set_examples(data);

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        let record = h.orchestrator.status().last_cycle.unwrap();
        assert!(matches!(record.outcome, CycleOutcome::Promoted { .. }));
        assert_eq!(record.invalid_examples, 20);
        // Every 5th of the 60 valid examples is held out.
        assert_eq!(h.store.get_scorecard("qa-v1").unwrap().unwrap().sample_count, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_examples_do_not_count_towards_min_samples() {
        let h = harness();
        let mut data = examples("ex", 40);
        data.extend((0..30).map(|_| Example {
            text: String::new(),
            label: 0,
        }));
        h.source.set_examples(data);

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        let record = h.orchestrator.status().last_cycle.unwrap();
        match record.outcome {
            CycleOutcome::Failed { phase, error } => {
                assert_eq!(phase, RetrainPhase::Collecting);
                assert!(error.contains("have 40, need 50"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(record.invalid_examples, 30);
        assert_eq!(h.trainer.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_rollout_is_recorded_as_failure() {
        let h = harness_with(
            config(),
            FakeTrainer::new(50.0),
            RecordingRollout {
                refuse: true,
                ..Default::default()
            },
        );
        h.source.set_examples(examples("ex", 80));

        assert!(h.orchestrator.force_retrain());
        h.orchestrator.wait_idle().await;

        match last_outcome(&h) {
            CycleOutcome::Failed { phase, error } => {
                assert_eq!(phase, RetrainPhase::Promoted);
                assert!(error.contains("rollout already active"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_fires_retrain() {
        let h = harness_with(
            RetrainConfig {
                schedule: Some(HumanDuration::from_secs(3600)),
                ..config()
            },
            FakeTrainer::new(50.0),
            RecordingRollout::default(),
        );
        h.source.set_examples(examples("ex", 80));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.orchestrator.clone().run_schedule(rx));
        tokio::time::sleep(Duration::from_secs(3601)).await;
        h.orchestrator.wait_idle().await;
        tx.send(true).unwrap();
        task.await.unwrap();

        let cycles = h.store.list_cycles("qa", 10).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].reason, TriggerReason::Schedule);
    }

    #[test]
    fn config_validation() {
        assert!(RetrainConfig::default().validate().is_ok());
        let bad = RetrainConfig {
            min_samples: 10,
            max_samples: 5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = RetrainConfig {
            holdout_fraction: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn holdout_fraction_above_two_thirds_is_rejected() {
        let ok = RetrainConfig {
            holdout_fraction: 0.6,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
        let bad = RetrainConfig {
            holdout_fraction: 0.7,
            ..Default::default()
        };
        assert!(bad.validate().unwrap_err().to_string().contains("every example"));
    }
}
