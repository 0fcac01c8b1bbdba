//! Notification sinks.

use std::sync::Arc;

use modelgrid_core::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::HttpClient;

/// Writes every notification to the log. Always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            match notification.kind {
                EventKind::RollbackTriggered | EventKind::RetrainFailed | EventKind::DriftAlert => {
                    warn!(
                        service = %notification.service,
                        kind = ?notification.kind,
                        "{}",
                        notification.message()
                    );
                }
                EventKind::PromotionDecision | EventKind::RolloutPromoted => {
                    info!(
                        service = %notification.service,
                        kind = ?notification.kind,
                        "{}",
                        notification.message()
                    );
                }
            }
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload {
    text: String,
}

/// Posts `{"text": message}` to a chat webhook, logging a copy locally.
pub struct WebhookNotifier {
    client: HttpClient,
    log: LogNotifier,
}

impl WebhookNotifier {
    /// `client` must be bound to the full webhook URL.
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            log: LogNotifier,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.log.notify(notification).await?;
            let payload = WebhookPayload {
                text: notification.message(),
            };
            self.client.post("", &payload).await.map_err(|e| {
                CollaboratorError::NotifyFailed(format!("webhook {}: {e}", self.client.base_url()))
            })
        })
    }
}

#[derive(Serialize)]
struct IssuePayload {
    title: String,
    body: String,
}

/// Opens a GitHub issue for every drift alert. Every notification, drift
/// alerts included, also goes to the wrapped notifier.
pub struct GithubIssueNotifier {
    client: HttpClient,
    repo: String,
    inner: Arc<dyn Notifier>,
}

impl GithubIssueNotifier {
    /// `client` must be bound to the API root and carry the
    /// `Authorization` header; `repo` is `owner/name`.
    pub fn new(client: HttpClient, repo: impl Into<String>, inner: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            repo: repo.into(),
            inner,
        }
    }

    async fn open_issue(&self, notification: &Notification) -> CollabResult<()> {
        let payload = IssuePayload {
            title: format!("[{}] DRIFT ALERT", notification.service),
            body: format!(
                "Automatic drift alert\n\n{}\n\nInvestigate and consider retraining.",
                notification.details
            ),
        };
        let path = format!("/repos/{}/issues", self.repo);
        self.client.post(&path, &payload).await.map_err(|e| {
            CollaboratorError::NotifyFailed(format!("github issue in {}: {e}", self.repo))
        })
    }
}

impl Notifier for GithubIssueNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            let forwarded = self.inner.notify(notification).await;
            if notification.kind != EventKind::DriftAlert {
                return forwarded;
            }
            let opened = self.open_issue(notification).await;
            if opened.is_ok() {
                info!(service = %notification.service, repo = %self.repo, "opened drift issue");
            }
            forwarded.and(opened)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::serve;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn notification() -> Notification {
        Notification {
            kind: EventKind::RollbackTriggered,
            service: "qa".into(),
            details: "from=Stage0 reason=error spike".into(),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.notify(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_posts_text_payload() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = received.clone();
        let router = Router::new().route(
            "/hooks/abc",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let base = serve(router).await;
        let client = HttpClient::new(
            &format!("{base}/hooks/abc"),
            Duration::from_secs(2),
            CollaboratorError::NotifyFailed,
        )
        .unwrap();

        WebhookNotifier::new(client).notify(&notification()).await.unwrap();
        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0]["text"],
            "[qa] ROLLBACK: from=Stage0 reason=error spike"
        );
    }

    type Captured = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn github(status: StatusCode) -> (GithubIssueNotifier, Captured) {
        let received: Captured = Arc::default();
        let sink = received.clone();
        let router = Router::new().route(
            "/repos/acme/models/issues",
            post(
                move |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| {
                    let sink = sink.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        sink.lock().unwrap().push((auth, body));
                        status
                    }
                },
            ),
        );
        let base = serve(router).await;
        let client = HttpClient::new(&base, Duration::from_secs(2), CollaboratorError::NotifyFailed)
            .unwrap()
            .with_header(http::header::AUTHORIZATION, "token ghp_test")
            .unwrap();
        (
            GithubIssueNotifier::new(client, "acme/models", Arc::new(LogNotifier)),
            received,
        )
    }

    fn drift_alert() -> Notification {
        Notification {
            kind: EventKind::DriftAlert,
            service: "qa".into(),
            details: "drift=0.4100 mean_similarity=0.5900 threshold=0.2500 samples=50".into(),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn drift_alert_opens_github_issue() {
        let (notifier, received) = github(StatusCode::CREATED).await;
        notifier.notify(&drift_alert()).await.unwrap();

        let issues = received.lock().unwrap().clone();
        assert_eq!(issues.len(), 1);
        let (auth, body) = &issues[0];
        assert_eq!(auth, "token ghp_test");
        assert_eq!(body["title"], "[qa] DRIFT ALERT");
        let text = body["body"].as_str().unwrap();
        assert!(text.starts_with("Automatic drift alert"));
        assert!(text.contains("drift=0.4100"));
    }

    #[tokio::test]
    async fn other_events_do_not_open_issues() {
        let (notifier, received) = github(StatusCode::CREATED).await;
        notifier.notify(&notification()).await.unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_issue_is_reported() {
        let (notifier, received) = github(StatusCode::UNAUTHORIZED).await;
        let err = notifier.notify(&drift_alert()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotifyFailed(ref m) if m.contains("acme/models")));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_failure_is_reported() {
        let router = Router::new().route("/hook", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let base = serve(router).await;
        let client = HttpClient::new(
            &format!("{base}/hook"),
            Duration::from_secs(2),
            CollaboratorError::NotifyFailed,
        )
        .unwrap();
        let err = WebhookNotifier::new(client)
            .notify(&notification())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::NotifyFailed(_)));
    }
}
