//! `[collaborators]` configuration section and client wiring.

use std::sync::Arc;

use modelgrid_core::*;
use serde::{Deserialize, Serialize};

use crate::client::HttpClient;
use crate::collaborators::{RemoteBackend, RemoteDataSource, RemoteEmbedder, RemoteTrainer};
use crate::notify::{GithubIssueNotifier, LogNotifier, WebhookNotifier};

/// Base URLs of the external services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub embedding_url: String,
    pub trainer_url: String,
    pub backend_url: String,
    pub data_url: String,
    /// Chat webhook; notifications only go to the log when unset.
    pub webhook_url: Option<String>,
    /// Opens an issue per drift alert when set.
    pub github: Option<GithubConfig>,
    /// Per-request timeout for everything except training.
    pub timeout: HumanDuration,
    pub train_timeout: HumanDuration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            embedding_url: "http://127.0.0.1:8501".into(),
            trainer_url: "http://127.0.0.1:8502".into(),
            backend_url: "http://127.0.0.1:8503".into(),
            data_url: "http://127.0.0.1:8504".into(),
            webhook_url: None,
            github: None,
            timeout: HumanDuration::from_secs(10),
            train_timeout: HumanDuration::from_secs(60 * 60),
        }
    }
}

/// `[collaborators.github]`: where drift issues are filed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GithubConfig {
    /// API root, e.g. a GitHub Enterprise endpoint or a local TLS proxy.
    pub api_url: String,
    /// `owner/name`.
    pub repo: String,
    pub token: String,
}

/// Every external collaborator, ready to hand to the control loop.
#[derive(Clone)]
pub struct RemoteCollaborators {
    pub embedder: Arc<dyn EmbeddingGateway>,
    pub trainer: Arc<dyn Trainer>,
    pub backend: Arc<dyn DeploymentBackend>,
    pub source: Arc<dyn DataSource>,
    pub notifier: Arc<dyn Notifier>,
}

impl RemoteConfig {
    /// Build clients for every configured URL. Fails on a malformed URL.
    pub fn connect(&self) -> CollabResult<RemoteCollaborators> {
        let timeout = self.timeout.as_duration();
        let notifier: Arc<dyn Notifier> = match &self.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(HttpClient::new(
                url,
                timeout,
                CollaboratorError::NotifyFailed,
            )?)),
            None => Arc::new(LogNotifier),
        };
        let notifier: Arc<dyn Notifier> = match &self.github {
            Some(gh) => {
                let client = HttpClient::new(&gh.api_url, timeout, CollaboratorError::NotifyFailed)?
                    .with_header(http::header::AUTHORIZATION, &format!("token {}", gh.token))?
                    .with_header(http::header::ACCEPT, "application/vnd.github+json")?;
                Arc::new(GithubIssueNotifier::new(client, gh.repo.clone(), notifier))
            }
            None => notifier,
        };
        Ok(RemoteCollaborators {
            embedder: Arc::new(RemoteEmbedder::new(HttpClient::new(
                &self.embedding_url,
                timeout,
                CollaboratorError::EmbeddingUnavailable,
            )?)),
            trainer: Arc::new(RemoteTrainer::new(
                HttpClient::new(
                    &self.trainer_url,
                    self.train_timeout.as_duration(),
                    CollaboratorError::BackendUnavailable,
                )?,
                HttpClient::new(&self.trainer_url, timeout, CollaboratorError::BackendUnavailable)?,
            )),
            backend: Arc::new(RemoteBackend::new(HttpClient::new(
                &self.backend_url,
                timeout,
                CollaboratorError::BackendUnavailable,
            )?)),
            source: Arc::new(RemoteDataSource::new(HttpClient::new(
                &self.data_url,
                timeout,
                CollaboratorError::DataUnavailable,
            )?)),
            notifier,
        })
    }
}
