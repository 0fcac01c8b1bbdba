//! Daemon assembly: state store, collaborators, service loops, REST API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use modelgrid_core::{Clock, SystemClock};
use modelgrid_lifecycle::{Collaborators, ModelgridConfig, ServiceRegistry};
use modelgrid_state::StateStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Everything the daemon runs, wired but not yet started.
pub struct Daemon {
    pub registry: Arc<ServiceRegistry>,
    pub port: u16,
}

/// Open the state store and build one service loop per `[[service]]`.
pub fn assemble(config: &ModelgridConfig) -> anyhow::Result<Daemon> {
    std::fs::create_dir_all(&config.daemon.data_dir)?;
    let db_path = config.daemon.data_dir.join("modelgrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let remote = config.collaborators.connect()?;
    info!(
        embedding = %config.collaborators.embedding_url,
        trainer = %config.collaborators.trainer_url,
        backend = %config.collaborators.backend_url,
        data = %config.collaborators.data_url,
        webhook = config.collaborators.webhook_url.is_some(),
        "collaborators configured"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let collab = Collaborators::from_remote(remote, clock);
    let registry = ServiceRegistry::new(&config.services, &collab, store);
    info!(services = ?registry.names(), "service loops initialized");

    Ok(Daemon {
        registry: Arc::new(registry),
        port: config.daemon.port,
    })
}

/// Start the loops, serve the API on `listener` until `signal` resolves,
/// then stop everything.
pub async fn serve<F>(daemon: Daemon, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = daemon.registry.start(shutdown_rx).await;

    let router = modelgrid_api::build_router(Arc::clone(&daemon.registry));
    info!(addr = ?listener.local_addr()?, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in handles {
        let _ = handle.await;
    }
    daemon.registry.shutdown().await;
    info!("modelgrid daemon stopped");
    Ok(())
}

/// Run until Ctrl-C.
pub async fn run(config: ModelgridConfig) -> anyhow::Result<()> {
    info!("modelgrid daemon starting");
    let daemon = assemble(&config)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], daemon.port));
    let listener = TcpListener::bind(addr).await?;

    serve(daemon, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config(dir: &std::path::Path) -> ModelgridConfig {
        let mut cfg = ModelgridConfig::parse(
            "[[service]]\nname = \"qa\"\n[[service]]\nname = \"search\"\n",
        )
        .unwrap();
        cfg.daemon.data_dir = dir.join("data");
        cfg
    }

    #[test]
    fn assemble_creates_data_dir_and_services() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = assemble(&config(dir.path())).unwrap();
        assert!(dir.path().join("data/modelgrid.redb").exists());
        assert_eq!(daemon.registry.names(), vec!["qa", "search"]);
        assert_eq!(daemon.port, 7400);
    }

    #[test]
    fn assemble_rejects_bad_collaborator_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.collaborators.backend_url = "https://secure:443".into();
        assert!(assemble(&cfg).is_err());
    }

    #[tokio::test]
    async fn serves_until_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = assemble(&config(dir.path())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(daemon, listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("\"success\":true"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
