//! Subcommands. Each returns the text to print.

mod actions;
mod inspect;

pub use actions::{baseline, retrain, rollback};
pub use inspect::{decisions, drift, services, status};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => anyhow::bail!("unknown format {other:?} (expected text or json)"),
        }
    }
}

/// Snake-case name of a unit enum variant, as it appears on the wire.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "?".to_string(),
    }
}

/// Left-aligned columns, two spaces apart.
fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut lines = vec![render(header.to_vec())];
    for row in rows {
        lines.push(render(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use modelgrid_core::testing::*;
    use modelgrid_core::{Clock, Stage, SystemClock};
    use modelgrid_lifecycle::{Collaborators, ServiceConfig, ServiceRegistry};
    use modelgrid_state::StateStore;

    use crate::client::ApiClient;

    /// A real API server over in-memory collaborators.
    pub(crate) struct Server {
        pub api: ApiClient,
        pub registry: Arc<ServiceRegistry>,
        pub source: Arc<FakeDataSource>,
    }

    pub(crate) async fn server() -> Server {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let source = Arc::new(FakeDataSource::new());
        let collab = Collaborators {
            embedder: Arc::new(FakeEmbedder::new(vec![1.0, 0.0])),
            trainer: Arc::new(FakeTrainer::new(10.0)),
            backend: Arc::new(FakeBackend::new(Arc::clone(&clock))),
            source: source.clone(),
            notifier: Arc::new(RecordingNotifier::new()),
            clock,
        };
        let registry = Arc::new(ServiceRegistry::new(
            &[ServiceConfig::new("qa")],
            &collab,
            StateStore::open_in_memory().unwrap(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = modelgrid_api::build_router(Arc::clone(&registry));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Server {
            api: ApiClient::new(&format!("http://{addr}")).unwrap(),
            registry,
            source,
        }
    }

    #[test]
    fn parses_formats() {
        assert_eq!(Format::parse("text").unwrap(), Format::Text);
        assert_eq!(Format::parse("json").unwrap(), Format::Json);
        assert!(Format::parse("yaml").is_err());
    }

    #[test]
    fn labels_use_wire_names() {
        assert_eq!(label(&Stage::RolledBack), "rolled_back");
        assert_eq!(label(&Stage::Stage0), "stage0");
    }

    #[test]
    fn table_aligns_columns() {
        let out = table(
            &["NAME", "STAGE"],
            &[vec!["support-intent".into(), "idle".into()], vec!["qa".into(), "stage1".into()]],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME            STAGE");
        assert_eq!(lines[2], "qa              stage1");
    }
}
