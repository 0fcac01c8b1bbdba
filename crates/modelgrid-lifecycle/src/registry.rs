//! Name → service loop map. Loops share collaborators and the store but
//! no state.

use std::collections::BTreeMap;
use std::sync::Arc;

use modelgrid_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServiceConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::service::{Collaborators, ServiceLoop};

pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<ServiceLoop>>,
    store: StateStore,
}

impl ServiceRegistry {
    pub fn new(configs: &[ServiceConfig], collab: &Collaborators, store: StateStore) -> Self {
        let services = configs
            .iter()
            .map(|cfg| {
                (
                    cfg.name.clone(),
                    Arc::new(ServiceLoop::new(cfg.clone(), collab, store.clone())),
                )
            })
            .collect();
        Self { services, store }
    }

    pub fn get(&self, name: &str) -> LifecycleResult<Arc<ServiceLoop>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownService(name.to_string()))
    }

    /// Service names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceLoop>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Start every service loop.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for service in self.services.values() {
            handles.extend(service.start(shutdown.clone()).await);
        }
        info!(services = self.services.len(), "all service loops started");
        handles
    }

    pub async fn shutdown(&self) {
        for service in self.services.values() {
            service.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_core::testing::*;
    use modelgrid_core::{Clock, HumanDuration, RetrainPhase, Stage, SystemClock};
    use std::time::Duration;

    fn collaborators() -> (Collaborators, Arc<FakeDataSource>, Arc<FakeEmbedder>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let source = Arc::new(FakeDataSource::new());
        let embedder = Arc::new(FakeEmbedder::new(vec![1.0, 0.0]));
        let collab = Collaborators {
            embedder: embedder.clone(),
            trainer: Arc::new(FakeTrainer::new(20.0)),
            backend: Arc::new(FakeBackend::new(Arc::clone(&clock))),
            source: source.clone(),
            notifier: Arc::new(RecordingNotifier::new()),
            clock,
        };
        (collab, source, embedder)
    }

    fn configs() -> Vec<ServiceConfig> {
        let mut fast = ServiceConfig::new("search");
        fast.drift.interval = HumanDuration::from_secs(60);
        vec![ServiceConfig::new("qa"), fast]
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let (collab, _, _) = collaborators();
        let registry = ServiceRegistry::new(&configs(), &collab, StateStore::open_in_memory().unwrap());
        assert_eq!(registry.names(), vec!["qa", "search"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("qa").unwrap().name(), "qa");
        assert!(matches!(
            registry.get("nope"),
            Err(LifecycleError::UnknownService(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn services_are_independent() {
        let (collab, _, _) = collaborators();
        let registry = ServiceRegistry::new(&configs(), &collab, StateStore::open_in_memory().unwrap());
        let qa = registry.get("qa").unwrap();
        let search = registry.get("search").unwrap();

        // Nothing to collect: the cycle sits in Collecting.
        assert!(qa.force_retrain());
        assert!(!qa.force_retrain());
        assert_eq!(qa.retrain().phase(), RetrainPhase::Collecting);
        assert_eq!(search.retrain().phase(), RetrainPhase::Idle);
        assert_eq!(search.force_rollback().await.stage, Stage::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_drift_timers_until_shutdown() {
        let (collab, source, embedder) = collaborators();
        source.set_traffic(vec!["a".into(), "b".into()]);
        let registry = ServiceRegistry::new(&configs(), &collab, StateStore::open_in_memory().unwrap());

        let (tx, rx) = watch::channel(false);
        let handles = registry.start(rx).await;
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        // Only the 1m service has observed: its first batch became the baseline.
        let search = registry.get("search").unwrap().status();
        assert!(search.drift.baseline.is_some());
        assert!(registry.get("qa").unwrap().status().drift.baseline.is_none());
        assert_eq!(embedder.calls(), 2);

        let _ = tx.send(true);
        for handle in handles {
            handle.await.unwrap();
        }
        registry.shutdown().await;
    }
}
