//! Health ingestor — background task per service feeding a `HealthWindow`.
//!
//! The ingestor polls `DeploymentBackend::get_health_samples` and appends
//! new samples to the service's window. The canary decision loop only
//! ever reads the window, so a slow or failing backend never blocks a
//! rollout decision; it just leaves the window without fresh samples.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use modelgrid_core::DeploymentBackend;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tracker::BackoffTracker;
use crate::window::HealthWindow;

/// The running ingestion task.
struct IngestSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl IngestSlot {
    fn cancel(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

/// Health ingestion for one service. At most one task runs at a time.
pub struct HealthIngestor {
    service: String,
    backend: Arc<dyn DeploymentBackend>,
    interval: Duration,
    slot: Mutex<Option<IngestSlot>>,
}

impl HealthIngestor {
    pub fn new(service: &str, backend: Arc<dyn DeploymentBackend>, interval: Duration) -> Self {
        Self {
            service: service.to_string(),
            backend,
            interval: interval.max(Duration::from_millis(1)),
            slot: Mutex::new(None),
        }
    }

    /// Start polling health into `window`, replacing any running task.
    pub fn start(&self, window: Arc<HealthWindow>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backend = Arc::clone(&self.backend);
        let interval = self.interval;
        let svc = self.service.clone();

        let handle = tokio::spawn(async move {
            run_ingest_loop(&svc, backend, window, interval, shutdown_rx).await;
        });

        let old = self.slot().replace(IngestSlot {
            handle,
            shutdown_tx,
        });
        if let Some(old) = old {
            old.cancel();
        }
        info!(
            service = %self.service,
            interval_ms = interval.as_millis() as u64,
            "health ingestion started"
        );
    }

    /// Stop the running task, if any.
    pub fn stop(&self) {
        let old = self.slot().take();
        if let Some(old) = old {
            old.cancel();
            info!(service = %self.service, "health ingestion stopped");
        }
    }

    pub fn is_ingesting(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<IngestSlot>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HealthIngestor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ingest_loop(
    service: &str,
    backend: Arc<dyn DeploymentBackend>,
    window: Arc<HealthWindow>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tracker = BackoffTracker::new(interval);
    // Ask for a little more than one period so consecutive polls overlap;
    // the window drops the duplicates.
    let lookback = interval * 2;

    debug!(service, "health ingest loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tracker.next_interval()) => {
                match backend.get_health_samples(service, lookback).await {
                    Ok(samples) => {
                        tracker.record_success();
                        let added = window.ingest(&samples);
                        debug!(service, received = samples.len(), added, "health samples ingested");
                    }
                    Err(e) => {
                        tracker.record_failure();
                        warn!(
                            service,
                            failures = tracker.consecutive_failures(),
                            error = %e,
                            "health poll failed"
                        );
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(service, "health ingest loop shutting down");
                break;
            }
        }
    }
}
