//! REST API handlers.
//!
//! Every response is `{success, data?, error?}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelgrid_core::{ModelId, RetrainPhase, Stage};
use modelgrid_drift::DriftError;
use modelgrid_lifecycle::{LifecycleError, ServiceLoop};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ApiState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn lookup(state: &ApiState, name: &str) -> Result<Arc<ServiceLoop>, Response> {
    state.registry.get(name).map_err(|e| match e {
        LifecycleError::UnknownService(_) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        other => error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    })
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// One row of the service list.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceSummary {
    pub name: String,
    pub stage: Stage,
    pub traffic_weight: u32,
    pub retrain_phase: RetrainPhase,
    pub champion: Option<ModelId>,
    pub last_drift_score: Option<f64>,
    pub drift_degraded: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RetrainResponse {
    /// `false` when a cycle was already running.
    pub started: bool,
    pub phase: RetrainPhase,
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    let summaries: Vec<ServiceSummary> = state
        .registry
        .iter()
        .map(|svc| {
            let status = svc.status();
            ServiceSummary {
                name: status.name,
                stage: status.canary.state.stage,
                traffic_weight: status.canary.state.traffic_weight,
                retrain_phase: status.retrain.phase,
                champion: status.champion.map(|c| c.model_id),
                last_drift_score: status.drift.last_report.map(|r| r.score),
                drift_degraded: status.drift.degraded,
            }
        })
        .collect();
    ApiResponse::ok(summaries)
}

/// GET /api/v1/services/{name}
pub async fn get_service(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match lookup(&state, &name) {
        Ok(svc) => ApiResponse::ok(svc.status()).into_response(),
        Err(resp) => resp,
    }
}

/// POST /api/v1/services/{name}/rollback
pub async fn rollback(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let svc = match lookup(&state, &name) {
        Ok(svc) => svc,
        Err(resp) => return resp,
    };
    info!(service = %name, "operator rollback requested");
    ApiResponse::ok(svc.force_rollback().await).into_response()
}

/// POST /api/v1/services/{name}/retrain
pub async fn retrain(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let svc = match lookup(&state, &name) {
        Ok(svc) => svc,
        Err(resp) => return resp,
    };
    let started = svc.force_retrain();
    info!(service = %name, started, "operator retrain requested");
    let body = RetrainResponse {
        started,
        phase: svc.retrain().phase(),
    };
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, ApiResponse::ok(body)).into_response()
}

/// Reference traffic for a new drift baseline.
#[derive(Debug, Serialize, Deserialize)]
pub struct BaselineRequest {
    pub texts: Vec<String>,
}

/// POST /api/v1/services/{name}/baseline
pub async fn rebuild_baseline(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<BaselineRequest>,
) -> Response {
    let svc = match lookup(&state, &name) {
        Ok(svc) => svc,
        Err(resp) => return resp,
    };
    info!(service = %name, texts = req.texts.len(), "operator baseline requested");
    match svc.rebuild_baseline(&req.texts).await {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(LifecycleError::Drift(e)) => {
            let status = match e {
                DriftError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(&e.to_string(), status)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/services/{name}/drift?limit=N
pub async fn drift_history(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let svc = match lookup(&state, &name) {
        Ok(svc) => svc,
        Err(resp) => return resp,
    };
    match svc.drift_history(query.resolve()) {
        Ok(reports) => ApiResponse::ok(reports).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/services/{name}/decisions?limit=N
pub async fn decisions(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let svc = match lookup(&state, &name) {
        Ok(svc) => svc,
        Err(resp) => return resp,
    };
    match svc.decisions(query.resolve()) {
        Ok(decisions) => ApiResponse::ok(decisions).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
