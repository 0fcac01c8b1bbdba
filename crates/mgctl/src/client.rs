//! Thin client for the modelgridd REST API.

use std::time::Duration;

use anyhow::{anyhow, bail};
use modelgrid_core::CollaboratorError;
use modelgrid_remote::HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// `{success, data?, error?}` as returned by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

pub struct ApiClient {
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let http = HttpClient::new(
            &format!("{}/api/v1", base.trim_end_matches('/')),
            Duration::from_secs(30),
            CollaboratorError::BackendUnavailable,
        )?;
        Ok(Self { http })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let envelope = self.http.get_json(path).await.map_err(api_error)?;
        unwrap(envelope)
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.post_body(path, &serde_json::json!({})).await
    }

    pub async fn post_body<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let envelope = self.http.post_json(path, body).await.map_err(api_error)?;
        unwrap(envelope)
    }
}

fn unwrap<T>(envelope: Envelope<T>) -> anyhow::Result<T> {
    match envelope {
        Envelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope { error: Some(e), .. } => bail!("{e}"),
        _ => bail!("malformed API response"),
    }
}

/// Surface the server's `error` field when a request is rejected.
fn api_error(e: CollaboratorError) -> anyhow::Error {
    if let CollaboratorError::Rejected(msg) = &e
        && let Some(start) = msg.find('{')
        && let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(&msg[start..])
        && let Some(error) = envelope.error
    {
        return anyhow!(error);
    }
    anyhow!(e)
}
