//! Serverless-style `POST /run`: one envelope in, one finished result out.
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::routes::AppState;
use crate::error::{AppError, AppResult};
use crate::jobs::JobStatus;
use crate::output::ResolvedOutput;
use crate::service::{GenerateRequest, Gateway, Submitted};

#[derive(Debug, Deserialize)]
pub struct RunEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Map<String, Value>,
}

pub async fn run(State(state): State<Arc<AppState>>, Json(envelope): Json<RunEnvelope>) -> Json<Value> {
    let id = envelope.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::info!(run_id = %id, "processing serverless job");
    match run_job(&state.gateway, envelope.input).await {
        Ok(output) => Json(json!({ "id": id, "status": "COMPLETED", "output": output })),
        Err(e) => {
            tracing::error!(run_id = %id, kind = e.kind(), "serverless job failed: {}", e);
            Json(json!({
                "id": id,
                "status": "FAILED",
                "error": { "kind": e.kind(), "message": e.to_string() },
            }))
        }
    }
}

async fn run_job(gateway: &Gateway, input: Map<String, Value>) -> AppResult<Value> {
    if input.get("image").map_or(true, Value::is_null) {
        return Err(AppError::InvalidInput("missing required parameter 'image'".into()));
    }
    let request: GenerateRequest = serde_json::from_value(Value::Object(input))
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let submitted = gateway.submit(request).await?;
    let done = gateway.run_to_completion(submitted.job.id()).await?;
    match done.job.status() {
        JobStatus::Completed => {}
        JobStatus::Timeout => {
            return Err(AppError::Timeout(done.job.error().unwrap_or("timed out").to_string()))
        }
        _ => {
            return Err(AppError::Engine(
                done.job.error().unwrap_or("execution failed").to_string(),
            ))
        }
    }
    let primary = primary_output(&done.outputs)
        .ok_or_else(|| AppError::Engine("job completed without any output file".into()))?;
    Ok(json!({
        "job_id": done.job.id(),
        "video_url": primary.media_url(),
        "metadata": metadata(&submitted),
    }))
}

/// Generation settings that actually reached the graph.
fn metadata(submitted: &Submitted) -> Value {
    let mut meta = Map::new();
    let Some(params) = &submitted.params else {
        return Value::Object(meta);
    };
    let fields = [
        ("width", "width", json!(params.width)),
        ("height", "height", json!(params.height)),
        ("num_frames", "num_frames", json!(params.num_frames)),
        ("frame_rate", "final_frame_rate", json!(params.final_frame_rate)),
    ];
    for (key, param, value) in fields {
        if submitted.was_applied(param) {
            meta.insert(key.into(), value);
        }
    }
    if submitted.was_applied("num_frames") && submitted.was_applied("final_frame_rate") {
        meta.insert("duration".into(), json!(params.duration_secs()));
    }
    Value::Object(meta)
}

/// The first video, or the first output of any kind.
fn primary_output(outputs: &[ResolvedOutput]) -> Option<&ResolvedOutput> {
    outputs
        .iter()
        .find(|o| o.content_type.starts_with("video/"))
        .or_else(|| outputs.first())
}
