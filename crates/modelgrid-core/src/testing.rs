//! In-memory collaborator fakes for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for the test suites of the other workspace crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::collab::*;
use crate::error::{CollabResult, CollaboratorError};
use crate::types::*;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self {
            now: AtomicU64::new(ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Embedding gateway backed by a lookup table.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fallback: Mutex<Vec<f32>>,
    failures_left: AtomicU32,
    always_fail: AtomicBool,
    calls: AtomicU32,
}

impl FakeEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            fallback: Mutex::new(fallback),
            ..Default::default()
        }
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        lock(&self.vectors).insert(text.to_string(), vector);
    }

    pub fn set_fallback(&self, vector: Vec<f32>) {
        *lock(&self.fallback) = vector;
    }

    /// Fail the next `n` calls with `EmbeddingUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingGateway for FakeEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Vec<f32>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::EmbeddingUnavailable("fake outage".into()));
            }
            let consumed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(CollaboratorError::EmbeddingUnavailable("fake blip".into()));
            }
            let vectors = lock(&self.vectors);
            Ok(vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| lock(&self.fallback).clone()))
        })
    }
}

/// Model that answers from a lookup table.
pub struct FakeModel {
    id: String,
    labels: HashMap<String, u32>,
    default_label: u32,
    latency_ms: f64,
}

impl FakeModel {
    pub fn new(id: &str, default_label: u32, latency_ms: f64) -> Self {
        Self {
            id: id.to_string(),
            labels: HashMap::new(),
            default_label,
            latency_ms,
        }
    }

    /// Model that predicts every example of `dataset` correctly.
    pub fn perfect(id: &str, dataset: &Dataset, latency_ms: f64) -> Self {
        let mut model = Self::new(id, 0, latency_ms);
        for example in &dataset.examples {
            model.labels.insert(example.text.clone(), example.label);
        }
        model
    }

    pub fn with_label(mut self, text: &str, label: u32) -> Self {
        self.labels.insert(text.to_string(), label);
        self
    }
}

impl ModelHandle for FakeModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn predict<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Prediction>> {
        Box::pin(async move {
            Ok(Prediction {
                label: self.labels.get(text).copied().unwrap_or(self.default_label),
                latency_ms: self.latency_ms,
            })
        })
    }
}

/// Trainer producing `FakeModel`s that fit their training data perfectly.
pub struct FakeTrainer {
    latency_ms: f64,
    fail: AtomicBool,
    panic: AtomicBool,
    calls: AtomicU32,
    /// When set, each `train` call waits for a permit before returning.
    gate: Option<Arc<Semaphore>>,
}

impl FakeTrainer {
    pub fn new(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            gate: None,
        }
    }

    /// Block training until permits are added to the returned semaphore.
    pub fn gated(latency_ms: f64) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut trainer = Self::new(latency_ms);
        trainer.gate = Some(Arc::clone(&gate));
        (trainer, gate)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `train` panic, as a crashing training client would.
    pub fn set_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Trainer for FakeTrainer {
    fn train<'a>(
        &'a self,
        service: &'a str,
        dataset: &'a Dataset,
        _config: &'a TrainingConfig,
    ) -> BoxFuture<'a, CollabResult<Arc<dyn ModelHandle>>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|_| CollaboratorError::TrainingFailed("gate closed".into()))?;
                permit.forget();
            }
            if self.panic.load(Ordering::SeqCst) {
                panic!("trainer crashed");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::TrainingFailed("loss diverged".into()));
            }
            let id = format!("{service}-v{n}");
            let model: Arc<dyn ModelHandle> =
                Arc::new(FakeModel::perfect(&id, dataset, self.latency_ms));
            Ok(model)
        })
    }
}

/// Health figures the fake backend reports for one side of the split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideHealth {
    pub error_rate: f64,
    pub latency_p95: f64,
}

/// Deployment backend that records traffic commands and reports a
/// configurable, steady health profile (one sample per side per poll).
pub struct FakeBackend {
    clock: Arc<dyn Clock>,
    splits: Mutex<Vec<(String, TrafficSplit)>>,
    champion: Mutex<SideHealth>,
    candidate: Mutex<SideHealth>,
    split_failures_left: AtomicU32,
    fail_splits: AtomicBool,
    fail_health: AtomicBool,
    health_calls: AtomicU32,
}

impl FakeBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let healthy = SideHealth {
            error_rate: 0.01,
            latency_p95: 100.0,
        };
        Self {
            clock,
            splits: Mutex::new(Vec::new()),
            champion: Mutex::new(healthy),
            candidate: Mutex::new(healthy),
            split_failures_left: AtomicU32::new(0),
            fail_splits: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
            health_calls: AtomicU32::new(0),
        }
    }

    pub fn set_champion_health(&self, health: SideHealth) {
        *lock(&self.champion) = health;
    }

    pub fn set_candidate_health(&self, health: SideHealth) {
        *lock(&self.candidate) = health;
    }

    pub fn fail_next_splits(&self, n: u32) {
        self.split_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_splits(&self, fail: bool) {
        self.fail_splits.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_health(&self, fail: bool) {
        self.fail_health.store(fail, Ordering::SeqCst);
    }

    /// Every successful traffic command, in order.
    pub fn splits(&self) -> Vec<TrafficSplit> {
        lock(&self.splits).iter().map(|(_, s)| *s).collect()
    }

    /// Number of full-revert commands received.
    pub fn revert_count(&self) -> usize {
        self.splits().iter().filter(|s| s.candidate == 0).count()
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }
}

impl DeploymentBackend for FakeBackend {
    fn set_traffic_split<'a>(
        &'a self,
        service: &'a str,
        split: TrafficSplit,
    ) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            if self.fail_splits.load(Ordering::SeqCst) {
                return Err(CollaboratorError::BackendUnavailable("fake outage".into()));
            }
            let consumed = self
                .split_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(CollaboratorError::BackendUnavailable("fake blip".into()));
            }
            lock(&self.splits).push((service.to_string(), split));
            Ok(())
        })
    }

    fn get_health_samples<'a>(
        &'a self,
        _service: &'a str,
        _window: Duration,
    ) -> BoxFuture<'a, CollabResult<Vec<HealthSample>>> {
        Box::pin(async move {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_health.load(Ordering::SeqCst) {
                return Err(CollaboratorError::BackendUnavailable("fake outage".into()));
            }
            let now = self.clock.now_ms();
            let champion = *lock(&self.champion);
            let candidate = *lock(&self.candidate);
            Ok(vec![
                HealthSample {
                    timestamp: now,
                    error_rate: champion.error_rate,
                    latency_p95: champion.latency_p95,
                    source: SampleSource::Champion,
                },
                HealthSample {
                    timestamp: now,
                    error_rate: candidate.error_rate,
                    latency_p95: candidate.latency_p95,
                    source: SampleSource::Candidate,
                },
            ])
        })
    }
}

/// Notifier that keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Notification> {
        lock(&self.events).clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.events).iter().filter(|n| n.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            lock(&self.events).push(notification.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::NotifyFailed("webhook down".into()));
            }
            Ok(())
        })
    }
}

/// Data source serving fixed traffic and labelled examples.
#[derive(Default)]
pub struct FakeDataSource {
    traffic: Mutex<Vec<String>>,
    examples: Mutex<Vec<Example>>,
}

impl FakeDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_traffic(&self, texts: Vec<String>) {
        *lock(&self.traffic) = texts;
    }

    pub fn set_examples(&self, examples: Vec<Example>) {
        *lock(&self.examples) = examples;
    }

    pub fn push_examples(&self, examples: Vec<Example>) {
        lock(&self.examples).extend(examples);
    }
}

impl DataSource for FakeDataSource {
    fn recent_traffic<'a>(
        &'a self,
        _service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<String>>> {
        Box::pin(async move {
            let traffic = lock(&self.traffic);
            let start = traffic.len().saturating_sub(limit);
            Ok(traffic[start..].to_vec())
        })
    }

    fn labelled_examples<'a>(
        &'a self,
        _service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<Example>>> {
        Box::pin(async move { Ok(lock(&self.examples).iter().take(limit).cloned().collect()) })
    }
}

/// `count` examples alternating between labels 0 and 1.
pub fn labelled(prefix: &str, count: usize) -> Vec<Example> {
    (0..count)
        .map(|i| Example {
            text: format!("{prefix}-{i}"),
            label: (i % 2) as u32,
        })
        .collect()
}
