//! A stand-in ComfyUI server on an ephemeral port.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use comfyui_job_gateway::Config;
use serde_json::{json, Value};

/// Polls answered with an empty history before the record appears.
pub const PENDING_POLLS: usize = 2;

#[derive(Default)]
pub struct FakeEngine {
    pub prompts: Mutex<Vec<Value>>,
    pub polls: Mutex<HashMap<String, usize>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
}

pub async fn spawn() -> (SocketAddr, Arc<FakeEngine>) {
    let state = Arc::new(FakeEngine::default());
    let app = Router::new()
        .route("/prompt", post(prompt))
        .route("/history/:id", get(history))
        .route("/view", get(view))
        .route("/upload/image", post(upload))
        .route("/system_stats", get(|| async { Json(json!({"system": {"os": "posix"}, "devices": []})) }))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, state)
}

async fn prompt(State(state): State<Arc<FakeEngine>>, Json(body): Json<Value>) -> impl IntoResponse {
    let graph = body["prompt"].clone();
    let broken = graph
        .as_object()
        .into_iter()
        .flatten()
        .find(|(_, node)| node["class_type"] == "Broken")
        .map(|(id, _)| id.clone());
    if let Some(id) = broken {
        let mut node_errors = serde_json::Map::new();
        node_errors.insert(
            id,
            json!({"errors": [{"type": "value_not_in_list", "message": "Value not in list"}], "class_type": "Broken"}),
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation"},
                "node_errors": node_errors
            })),
        );
    }
    let mut prompts = state.prompts.lock().unwrap();
    prompts.push(graph);
    let n = prompts.len();
    (
        StatusCode::OK,
        Json(json!({"prompt_id": format!("p-{}", n), "number": n, "node_errors": {}})),
    )
}

async fn history(State(state): State<Arc<FakeEngine>>, UrlPath(id): UrlPath<String>) -> Json<Value> {
    let mut polls = state.polls.lock().unwrap();
    let count = polls.entry(id.clone()).or_insert(0);
    *count += 1;
    if *count <= PENDING_POLLS {
        return Json(json!({}));
    }
    let mut body = serde_json::Map::new();
    body.insert(
        id.clone(),
        json!({
            "prompt": [1, id, {}, {}, ["9"]],
            "outputs": {"9": {"gifs": [{"filename": "clip.mp4", "subfolder": "", "type": "output", "format": "video/h264-mp4"}]}},
            "status": {"status_str": "success", "completed": true, "messages": []}
        }),
    );
    Json(Value::Object(body))
}

async fn view(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    let wanted = (
        q.get("filename").map(String::as_str),
        q.get("subfolder").map(String::as_str),
        q.get("type").map(String::as_str),
    );
    if wanted == (Some("clip.mp4"), Some(""), Some("output")) {
        (StatusCode::OK, [(header::CONTENT_TYPE, "video/mp4")], b"MP4DATA".to_vec())
    } else {
        (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], b"not found".to_vec())
    }
}

async fn upload(State(state): State<Arc<FakeEngine>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("multipart/form-data"));
    let text = String::from_utf8_lossy(&body);
    if !is_multipart || !text.contains("name=\"image\"") {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "no image"})));
    }
    state.uploads.lock().unwrap().push(body.to_vec());
    (StatusCode::OK, Json(json!({"name": "staged.png", "subfolder": "", "type": "input"})))
}

pub fn config(engine: SocketAddr, workflows: &Path) -> Config {
    Config {
        comfyui_url: format!("http://{}", engine),
        api_host: "127.0.0.1".into(),
        api_port: 0,
        workflows_dir: workflows.to_path_buf(),
        default_workflow: None,
        sync_mode: false,
        poll_interval: Duration::from_millis(20),
        job_timeout: Duration::from_secs(10),
        request_timeout: Duration::from_secs(5),
        job_retention: Duration::from_secs(3600),
        webhook_url: None,
        ffmpeg_path: "ffmpeg".into(),
        bucket: None,
    }
}
