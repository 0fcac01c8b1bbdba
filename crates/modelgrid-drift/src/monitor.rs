//! Drift monitor — scores traffic batches against the service baseline.
//!
//! One `DriftMonitor` exists per service. It is driven by a periodic timer
//! (`run`) and allows a single observation in flight: a tick that arrives
//! while the previous one is still embedding is skipped, never queued.
//! Exceeding the threshold raises one `DriftAlert` notification and asks
//! the retrain orchestrator to start a cycle; the orchestrator decides
//! whether a cycle is already running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use modelgrid_core::collab::dispatch;
use modelgrid_core::*;
use modelgrid_state::StateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{DriftError, DriftResult};
use crate::summary::{cosine_distance, summarize};

/// Drift monitor settings for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriftConfig {
    /// Alert when the cosine drift score is strictly greater than this.
    pub threshold: f64,
    /// Time between periodic observations.
    pub interval: HumanDuration,
    /// Number of recent traffic items scored per observation.
    pub batch_size: usize,
    /// Install the first observed batch as baseline when none exists.
    pub bootstrap_baseline: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            threshold: 0.12,
            interval: HumanDuration::from_secs(300),
            batch_size: 64,
            bootstrap_baseline: true,
        }
    }
}

/// What a periodic tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A previous observation was still running.
    Skipped,
    /// The traffic source had nothing to score.
    NoTraffic,
    Observed(DriftReport),
    Failed(DriftError),
}

/// Resets the in-flight flag when an observation ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-service drift monitor.
pub struct DriftMonitor {
    service: ServiceName,
    config: DriftConfig,
    retry: RetryPolicy,
    gateway: Arc<dyn EmbeddingGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    store: Option<StateStore>,
    baseline: RwLock<Option<Arc<Baseline>>>,
    last_report: RwLock<Option<DriftReport>>,
    trigger: OnceLock<Arc<dyn RetrainTrigger>>,
    busy: AtomicBool,
    degraded: AtomicBool,
}

impl DriftMonitor {
    /// Create a monitor with no baseline and no retrain trigger.
    pub fn new(
        service: &str,
        config: DriftConfig,
        gateway: Arc<dyn EmbeddingGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service: service.to_string(),
            config,
            retry: RetryPolicy::default(),
            gateway,
            notifier,
            clock,
            store: None,
            baseline: RwLock::new(None),
            last_report: RwLock::new(None),
            trigger: OnceLock::new(),
            busy: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Persist reports and baselines, and resume from the newest stored baseline.
    pub fn with_store(mut self, store: StateStore) -> Self {
        match store.latest_baseline(&self.service) {
            Ok(Some(baseline)) => {
                debug!(service = %self.service, created_at = baseline.created_at, "baseline restored");
                self.baseline = RwLock::new(Some(Arc::new(baseline)));
            }
            Ok(None) => {}
            Err(e) => warn!(service = %self.service, error = %e, "failed to load baseline"),
        }
        self.store = Some(store);
        self
    }

    /// Install an existing baseline (e.g. one computed offline).
    pub fn with_baseline(self, baseline: Baseline) -> Self {
        *write(&self.baseline) = Some(Arc::new(baseline));
        self
    }

    /// Connect the retrain orchestrator. Only the first call has an effect.
    pub fn set_trigger(&self, trigger: Arc<dyn RetrainTrigger>) {
        if self.trigger.set(trigger).is_err() {
            warn!(service = %self.service, "retrain trigger already connected");
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn baseline(&self) -> Option<Arc<Baseline>> {
        read(&self.baseline).clone()
    }

    pub fn last_report(&self) -> Option<DriftReport> {
        read(&self.last_report).clone()
    }

    /// Whether the last observation failed because embeddings were unavailable.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Score a batch of raw texts against the baseline.
    pub async fn observe(&self, batch: &[String]) -> DriftResult<DriftReport> {
        if batch.is_empty() {
            return Err(DriftError::EmptyBatch);
        }

        let vectors = match self.embed_all(batch).await {
            Ok(v) => v,
            Err(e) => {
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    warn!(service = %self.service, error = %e, "drift monitor degraded");
                }
                return Err(e);
            }
        };
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!(service = %self.service, "drift monitor recovered");
        }

        let summary = summarize(&vectors)?;
        let now = self.clock.now_ms();

        let baseline = match self.baseline() {
            Some(b) => b,
            None if self.config.bootstrap_baseline => {
                info!(service = %self.service, samples = summary.count, "bootstrapping baseline from first batch");
                self.install_baseline(summary.clone(), None, now)
            }
            None => return Err(DriftError::NoBaseline(self.service.clone())),
        };

        let score = cosine_distance(&summary.centroid, &baseline.summary.centroid)?;
        let report = DriftReport {
            service: self.service.clone(),
            timestamp: now,
            score,
            mean_similarity: 1.0 - score,
            sample_count: batch.len(),
            threshold: self.config.threshold,
            exceeded_threshold: score > self.config.threshold,
        };

        if let Some(store) = &self.store
            && let Err(e) = store.append_drift_report(&report)
        {
            warn!(service = %self.service, error = %e, "failed to persist drift report");
        }
        *write(&self.last_report) = Some(report.clone());

        if report.exceeded_threshold {
            self.raise_alert(&report).await;
        } else {
            debug!(
                service = %self.service,
                score,
                threshold = self.config.threshold,
                "no drift detected"
            );
        }

        Ok(report)
    }

    /// One periodic evaluation over the most recent traffic.
    pub async fn tick(&self, source: &dyn DataSource) -> TickOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(service = %self.service, "observation still in flight, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = BusyGuard(&self.busy);

        let batch = match source
            .recent_traffic(&self.service, self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(service = %self.service, error = %e, "failed to fetch traffic window");
                return TickOutcome::Failed(DriftError::SourceUnavailable(e.to_string()));
            }
        };
        if batch.is_empty() {
            debug!(service = %self.service, "no recent traffic to score");
            return TickOutcome::NoTraffic;
        }

        match self.observe(&batch).await {
            Ok(report) => TickOutcome::Observed(report),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Run periodic observations until shutdown.
    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn DataSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.config.interval.as_duration().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; observe one period from now.
        interval.tick().await;

        info!(service = %self.service, interval_secs = period.as_secs(), "drift monitor started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let TickOutcome::Failed(e) = self.tick(source.as_ref()).await {
                        warn!(service = %self.service, error = %e, "drift observation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(service = %self.service, "drift monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Replace the baseline with one built from `texts` (a new champion's
    /// training data). The previous baseline is kept in the store.
    pub async fn rebuild_baseline(
        &self,
        texts: &[String],
        model_id: Option<&str>,
    ) -> DriftResult<Arc<Baseline>> {
        if texts.is_empty() {
            return Err(DriftError::EmptyBatch);
        }
        let vectors = self.embed_all(texts).await?;
        let summary = summarize(&vectors)?;
        let baseline = self.install_baseline(summary, model_id, self.clock.now_ms());
        info!(
            service = %self.service,
            samples = baseline.sample_count,
            model = ?model_id,
            "baseline recomputed"
        );
        Ok(baseline)
    }

    fn install_baseline(
        &self,
        summary: VectorSummary,
        model_id: Option<&str>,
        now: u64,
    ) -> Arc<Baseline> {
        let baseline = Arc::new(Baseline {
            service: self.service.clone(),
            sample_count: summary.count,
            summary,
            created_at: now,
            model_id: model_id.map(str::to_string),
        });
        if let Some(store) = &self.store
            && let Err(e) = store.append_baseline(&baseline)
        {
            warn!(service = %self.service, error = %e, "failed to persist baseline");
        }
        *write(&self.baseline) = Some(Arc::clone(&baseline));
        baseline
    }

    async fn embed_all(&self, texts: &[String]) -> DriftResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let vector = self
                .retry
                .run("embed", move || self.gateway.embed(text))
                .await
                .map_err(|e| DriftError::EmbeddingUnavailable(e.to_string()))?;
            vectors.push(vector);
        }
        Ok(vectors)
    }

    async fn raise_alert(&self, report: &DriftReport) {
        warn!(
            service = %self.service,
            score = report.score,
            threshold = report.threshold,
            samples = report.sample_count,
            "drift threshold exceeded"
        );
        dispatch(
            self.notifier.as_ref(),
            Notification {
                kind: EventKind::DriftAlert,
                service: self.service.clone(),
                details: format!(
                    "drift={:.4} (threshold={}) mean_sim={:.4} samples={}",
                    report.score, report.threshold, report.mean_similarity, report.sample_count
                ),
                timestamp: report.timestamp,
            },
        )
        .await;

        match self.trigger.get() {
            Some(trigger) => {
                if !trigger.trigger(TriggerReason::Drift {
                    score: report.score,
                }) {
                    debug!(service = %self.service, "retrain already in flight, drift alert dropped");
                }
            }
            None => debug!(service = %self.service, "no retrain trigger connected"),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
