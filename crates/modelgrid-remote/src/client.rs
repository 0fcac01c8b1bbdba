//! Minimal HTTP/1 JSON client.
//!
//! One connection per request, driven in the background, with the whole
//! exchange bounded by a timeout. Failures are classified for the retry
//! policy: connection errors, timeouts and 5xx responses are reported
//! with the client's transient error kind, 4xx responses as
//! `CollaboratorError::Rejected`.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use modelgrid_core::{CollabResult, CollaboratorError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

/// Builds the error reported for a failure worth retrying.
pub type TransientKind = fn(String) -> CollaboratorError;

/// JSON client bound to one base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    authority: String,
    prefix: String,
    timeout: Duration,
    transient: TransientKind,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HttpClient {
    /// Parse `base` (`http://host:port[/prefix]`). Only plain HTTP is
    /// supported.
    pub fn new(base: &str, timeout: Duration, transient: TransientKind) -> CollabResult<Self> {
        let uri: Uri = base
            .parse()
            .map_err(|e| CollaboratorError::Rejected(format!("invalid URL {base:?}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(CollaboratorError::Rejected(format!(
                "unsupported URL {base:?}: only http:// is supported"
            )));
        }
        // `host()` keeps the brackets of an IPv6 literal.
        let host = uri
            .host()
            .ok_or_else(|| CollaboratorError::Rejected(format!("URL {base:?} has no host")))?;
        let authority = format!("{host}:{}", uri.port_u16().unwrap_or(80));
        Ok(Self {
            authority,
            prefix: uri.path().trim_end_matches('/').to_string(),
            timeout,
            transient,
            headers: Vec::new(),
        })
    }

    /// Send `name: value` with every request. Values are marked
    /// sensitive so they stay out of `Debug` output.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> CollabResult<Self> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| CollaboratorError::Rejected(format!("invalid {name} header: {e}")))?;
        value.set_sensitive(true);
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}{}", self.authority, self.prefix)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CollabResult<T> {
        let body = self.send(Method::GET, path, None).await?;
        self.decode(path, &body)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CollabResult<T> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| CollaboratorError::Rejected(format!("encode request: {e}")))?;
        let body = self.send(Method::POST, path, Some(payload)).await?;
        self.decode(path, &body)
    }

    /// POST and ignore the response body.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> CollabResult<()> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| CollaboratorError::Rejected(format!("encode request: {e}")))?;
        self.send(Method::POST, path, Some(payload)).await?;
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, path: &str, body: &[u8]) -> CollabResult<T> {
        serde_json::from_slice(body).map_err(|e| {
            CollaboratorError::Rejected(format!("invalid response from {}{path}: {e}", self.base_url()))
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> CollabResult<Bytes> {
        let uri = format!("http://{}{}{}", self.authority, self.prefix, path);
        let transient = self.transient;

        let exchange = async {
            let stream = TcpStream::connect(&self.authority)
                .await
                .map_err(|e| transient(format!("connect {}: {e}", self.authority)))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| transient(format!("handshake {}: {e}", self.authority)))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "connection closed with error");
                }
            });

            let mut builder = Request::builder()
                .method(method)
                .uri(&uri)
                .header(HOST, &self.authority)
                .header(USER_AGENT, "modelgrid/0.1");
            for (name, value) in &self.headers {
                builder = builder.header(name, value);
            }
            if body.is_some() {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| CollaboratorError::Rejected(format!("build request {uri}: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| transient(format!("{uri}: {e}")))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| transient(format!("{uri}: reading body: {e}")))?
                .to_bytes();

            if status.is_success() {
                return Ok(bytes);
            }
            let detail = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]).into_owned();
            debug!(%uri, %status, "request failed");
            if status.is_server_error() {
                Err(transient(format!("{uri}: {status}: {detail}")))
            } else {
                Err(CollaboratorError::Rejected(format!("{uri}: {status}: {detail}")))
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(transient(format!(
                "{uri}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
