//! # HTTP control surface.
//!
//! | Method & path               | Body                    | Response                     |
//! |-----------------------------|-------------------------|------------------------------|
//! | `GET /health`               |                         | service status + counts      |
//! | `GET /workers`              |                         | `{workers: [...]}`           |
//! | `POST /workers/reconcile`   | `{desiredCount}`        | `{workers: [...]}`           |
//! | `POST /workers/start`       | `{workerId?, port?}`    | `{worker}`                   |
//! | `POST /workers/{id}/start`  | `{port?}`               | `{worker}`                   |
//! | `POST /workers/{id}/stop`   | `{signal?}`             | `{worker}` or `{}` if unknown|
//!
//! Errors are rendered as `{error, code}` (see [`ApiError`]). Authentication is the
//! caller's concern.

mod error;
mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::core::Supervisor;

pub use error::ApiError;

/// Service name reported by `GET /health`.
pub const SERVICE_NAME: &str = "worker-manager";

/// Builds the control-surface router around a shared supervisor.
pub fn router(sup: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/workers", get(handlers::list_workers))
        .route("/workers/reconcile", post(handlers::reconcile))
        .route("/workers/start", post(handlers::start_worker))
        .route("/workers/{id}/start", post(handlers::start_named))
        .route("/workers/{id}/stop", post(handlers::stop_worker))
        .with_state(sup)
        .layer(TraceLayer::new_for_http())
}
