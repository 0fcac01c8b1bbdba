//! modelgrid-api — REST API for the model lifecycle control loop.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/services` | List services with stage, phase, champion |
//! | GET | `/api/v1/services/{name}` | Full status of one service |
//! | POST | `/api/v1/services/{name}/rollback` | Abort the active rollout |
//! | POST | `/api/v1/services/{name}/retrain` | Start a retrain cycle |
//! | POST | `/api/v1/services/{name}/baseline` | Seed the drift baseline from `{texts}` |
//! | GET | `/api/v1/services/{name}/drift?limit=N` | Recent drift reports |
//! | GET | `/api/v1/services/{name}/decisions?limit=N` | Recent promotion decisions |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use modelgrid_lifecycle::ServiceRegistry;

pub use handlers::{BaselineRequest, RetrainResponse, ServiceSummary};
pub use modelgrid_lifecycle::BaselineInfo;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ServiceRegistry>,
}

/// Build the complete API router.
pub fn build_router(registry: Arc<ServiceRegistry>) -> Router {
    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route("/services/{name}/rollback", post(handlers::rollback))
        .route("/services/{name}/retrain", post(handlers::retrain))
        .route("/services/{name}/baseline", post(handlers::rebuild_baseline))
        .route("/services/{name}/drift", get(handlers::drift_history))
        .route("/services/{name}/decisions", get(handlers::decisions))
        .with_state(ApiState { registry });

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
