use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{ApiError, SERVICE_NAME};
use crate::core::{StartRequest, Supervisor};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileBody {
    desired_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PortBody {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct StopBody {
    signal: Option<String>,
}

/// Empty bodies read as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(ApiError::bad_request)
}

pub(super) async fn health(State(sup): State<Arc<Supervisor>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "managerId": sup.manager_id(),
        "pid": std::process::id(),
        "workers": sup.health(),
    }))
}

pub(super) async fn list_workers(State(sup): State<Arc<Supervisor>>) -> Json<Value> {
    Json(json!({ "workers": sup.list_workers() }))
}

pub(super) async fn reconcile(
    State(sup): State<Arc<Supervisor>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: ReconcileBody = parse_body(&body)?;
    let desired = body
        .desired_count
        .ok_or_else(|| ApiError::bad_request("desiredCount is required"))?;
    let workers = sup.reconcile(desired).await?;
    Ok(Json(json!({ "workers": workers })))
}

pub(super) async fn start_worker(
    State(sup): State<Arc<Supervisor>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: StartRequest = parse_body(&body)?;
    let worker = sup.start_worker(req).await?;
    Ok(Json(json!({ "worker": worker })))
}

pub(super) async fn start_named(
    State(sup): State<Arc<Supervisor>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: PortBody = parse_body(&body)?;
    let req = StartRequest {
        worker_id: Some(id),
        port: body.port,
    };
    let worker = sup.start_worker(req).await?;
    Ok(Json(json!({ "worker": worker })))
}

pub(super) async fn stop_worker(
    State(sup): State<Arc<Supervisor>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: StopBody = parse_body(&body)?;
    let stopped = sup.stop_worker(&id, body.signal.as_deref()).await?;
    Ok(Json(match stopped {
        Some(worker) => json!({ "worker": worker }),
        None => json!({}),
    }))
}
