//! Axum request handlers for the HTTP API.
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::routes::AppState;
use crate::error::{AppError, AppResult};
use crate::jobs::Job;
use crate::output::{OutputPayload, ResolvedOutput};
use crate::service::{Completion, GenerateRequest, HealthReport};

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    let templates = state.gateway.templates().await.unwrap_or_default();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "engine_url": state.gateway.engine_url(),
        "object_storage": state.gateway.has_object_store(),
        "templates": templates,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.gateway.health().await)
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let templates = state.gateway.templates().await?;
    Ok(Json(json!({ "templates": templates })))
}

pub async fn template_info(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let nodes = state.gateway.template_info(&name).await?;
    Ok(Json(json!({ "name": name, "nodes": nodes })))
}

/// Submit a job. Waits for completion when the request (or `SYNC_MODE`) asks
/// for it; otherwise answers `202` and keeps polling in the background.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<Response> {
    let wait = state.gateway.should_wait(request.wait);
    let submitted = state.gateway.submit(request).await?;
    let id = submitted.job.id();
    if wait {
        let done = state.gateway.run_to_completion(id).await?;
        return Ok(Json(completion_body(&done)).into_response());
    }
    state.gateway.spawn_watch(id);
    Ok((StatusCode::ACCEPTED, Json(job_body(&submitted.job))).into_response())
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_job_id(&job_id)?;
    let job = state.gateway.check(id).await?;
    Ok(Json(job_body(&job)))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub index: usize,
}

/// Redirect to the stored object, or stream the bytes back.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let id = parse_job_id(&job_id)?;
    let output = state.gateway.download(id, query.index).await?;
    Ok(output_response(output))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Value> {
    let jobs: Vec<Value> = state
        .gateway
        .jobs()
        .list()
        .await
        .iter()
        .map(|job| {
            json!({
                "job_id": job.id(),
                "prompt_id": job.prompt_id(),
                "template": job.template(),
                "status": job.status(),
                "created_at": job.created_at(),
            })
        })
        .collect();
    Json(json!({ "jobs": jobs }))
}

fn parse_job_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::InvalidInput(format!("'{}' is not a job id", raw)))
}

fn job_body(job: &Job) -> Value {
    serde_json::to_value(job).unwrap_or_else(|_| json!({ "job_id": job.id() }))
}

fn completion_body(done: &Completion) -> Value {
    let mut body = job_body(&done.job);
    body["outputs"] = json!(done.outputs);
    body
}

fn output_response(output: ResolvedOutput) -> Response {
    match output.payload {
        OutputPayload::Url(url) => Redirect::temporary(&url).into_response(),
        OutputPayload::Inline(bytes) => {
            let disposition = format!("inline; filename=\"{}\"", output.filename.replace('"', ""));
            (
                [
                    (header::CONTENT_TYPE, output.content_type),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
    }
}
