//! HTTP implementations of the external collaborator traits.
//!
//! Wire contract (all bodies JSON):
//!
//! | Collaborator | Request | Response |
//! |---|---|---|
//! | embedding | `POST /embed {text}` | `{vector}` |
//! | trainer | `POST /train {service, examples, config}` | `{model_id}` |
//! | model | `POST /models/{id}/predict {text}` | `{label, latency_ms?}` |
//! | backend | `POST /services/{svc}/traffic {champion, candidate}` | any |
//! | backend | `GET /services/{svc}/health?window_secs=N` | `[HealthSample]` |
//! | data | `GET /services/{svc}/traffic?limit=N` | `[text]` |
//! | data | `GET /services/{svc}/examples?limit=N` | `[{text, label}]` |

use std::sync::Arc;
use std::time::{Duration, Instant};

use modelgrid_core::*;
use serde::{Deserialize, Serialize};

use crate::client::HttpClient;

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
}

/// Embedding service client.
pub struct RemoteEmbedder {
    client: HttpClient,
}

impl RemoteEmbedder {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl EmbeddingGateway for RemoteEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Vec<f32>>> {
        Box::pin(async move {
            let resp: EmbedResponse = self.client.post_json("/embed", &TextRequest { text }).await?;
            if resp.vector.is_empty() {
                return Err(CollaboratorError::Rejected("empty embedding vector".into()));
            }
            Ok(resp.vector)
        })
    }
}

#[derive(Serialize)]
struct TrainRequest<'a> {
    service: &'a str,
    examples: &'a [Example],
    config: &'a TrainingConfig,
}

#[derive(Deserialize)]
struct TrainResponse {
    model_id: ModelId,
}

/// Training service client. Trained models are served by the same service.
pub struct RemoteTrainer {
    client: HttpClient,
    /// Client used by the returned model handles; training calls usually
    /// need a far longer timeout than predictions.
    predict_client: HttpClient,
}

impl RemoteTrainer {
    pub fn new(client: HttpClient, predict_client: HttpClient) -> Self {
        Self {
            client,
            predict_client,
        }
    }
}

impl Trainer for RemoteTrainer {
    fn train<'a>(
        &'a self,
        service: &'a str,
        dataset: &'a Dataset,
        config: &'a TrainingConfig,
    ) -> BoxFuture<'a, CollabResult<Arc<dyn ModelHandle>>> {
        Box::pin(async move {
            let req = TrainRequest {
                service,
                examples: &dataset.examples,
                config,
            };
            let resp: TrainResponse = self.client.post_json("/train", &req).await.map_err(|e| match e {
                CollaboratorError::Rejected(msg) => CollaboratorError::TrainingFailed(msg),
                other => other,
            })?;
            Ok(Arc::new(RemoteModel {
                id: resp.model_id,
                client: self.predict_client.clone(),
            }) as Arc<dyn ModelHandle>)
        })
    }
}

#[derive(Deserialize)]
struct PredictResponse {
    label: u32,
    latency_ms: Option<f64>,
}

/// A model version served over HTTP.
pub struct RemoteModel {
    id: ModelId,
    client: HttpClient,
}

impl RemoteModel {
    pub fn new(id: impl Into<ModelId>, client: HttpClient) -> Self {
        Self {
            id: id.into(),
            client,
        }
    }
}

impl ModelHandle for RemoteModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn predict<'a>(&'a self, text: &'a str) -> BoxFuture<'a, CollabResult<Prediction>> {
        Box::pin(async move {
            let started = Instant::now();
            let path = format!("/models/{}/predict", self.id);
            let resp: PredictResponse = self
                .client
                .post_json(&path, &TextRequest { text })
                .await
                .map_err(|e| match e {
                    CollaboratorError::Rejected(msg) => CollaboratorError::PredictionFailed(msg),
                    other => other,
                })?;
            // Server-reported latency wins; otherwise the round trip is used.
            let latency_ms = resp
                .latency_ms
                .unwrap_or_else(|| started.elapsed().as_secs_f64() * 1000.0);
            Ok(Prediction {
                label: resp.label,
                latency_ms,
            })
        })
    }
}

/// Deployment backend client.
pub struct RemoteBackend {
    client: HttpClient,
}

impl RemoteBackend {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl DeploymentBackend for RemoteBackend {
    fn set_traffic_split<'a>(
        &'a self,
        service: &'a str,
        split: TrafficSplit,
    ) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.client
                .post(&format!("/services/{service}/traffic"), &split)
                .await
        })
    }

    fn get_health_samples<'a>(
        &'a self,
        service: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, CollabResult<Vec<HealthSample>>> {
        Box::pin(async move {
            let path = format!(
                "/services/{service}/health?window_secs={}",
                window.as_secs().max(1)
            );
            self.client.get_json(&path).await
        })
    }
}

/// Ingestion pipeline client.
pub struct RemoteDataSource {
    client: HttpClient,
}

impl RemoteDataSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl DataSource for RemoteDataSource {
    fn recent_traffic<'a>(
        &'a self,
        service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<String>>> {
        Box::pin(async move {
            self.client
                .get_json(&format!("/services/{service}/traffic?limit={limit}"))
                .await
        })
    }

    fn labelled_examples<'a>(
        &'a self,
        service: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, CollabResult<Vec<Example>>> {
        Box::pin(async move {
            self.client
                .get_json(&format!("/services/{service}/examples?limit={limit}"))
                .await
        })
    }
}
