//! In-memory engine double for unit tests.
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::comfyui::{Engine, HistoryEntry, OutputFile, QueuedPrompt};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::workflow::Graph;

/// Defaults with templates read from `dir`; no bucket, webhook or default template.
pub fn test_config(dir: &Path) -> Config {
    Config {
        comfyui_url: "http://engine.test:8188".into(),
        api_host: "127.0.0.1".into(),
        api_port: 0,
        workflows_dir: dir.to_path_buf(),
        default_workflow: None,
        sync_mode: false,
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        job_retention: Duration::from_secs(3600),
        webhook_url: None,
        ffmpeg_path: "ffmpeg".into(),
        bucket: None,
    }
}

pub fn write_template(dir: &Path, name: &str, graph: &Value) {
    std::fs::write(dir.join(format!("{}.json", name)), graph.to_string()).unwrap();
}

#[derive(Debug, Clone)]
pub enum HistoryStep {
    Missing,
    Entry(Value),
    Unavailable,
}

/// Replays a history script; the last step repeats forever.
pub struct ScriptedEngine {
    history: Mutex<VecDeque<HistoryStep>>,
    history_calls: AtomicUsize,
    submitted: Mutex<Vec<Value>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    reject_with: Mutex<Option<Value>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        ScriptedEngine {
            history: Mutex::new(VecDeque::from(vec![HistoryStep::Missing])),
            history_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
            reject_with: Mutex::new(None),
        }
    }

    pub fn with_history(self, steps: Vec<HistoryStep>) -> Self {
        *self.history.lock().unwrap() = steps.into();
        self
    }

    pub fn with_file(self, filename: &str, bytes: &[u8]) -> Self {
        self.files.lock().unwrap().insert(filename.to_string(), bytes.to_vec());
        self
    }

    pub fn rejecting(self, node_errors: Value) -> Self {
        *self.reject_with.lock().unwrap() = Some(node_errors);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn submit(&self, graph: &Graph, _client_id: &str) -> AppResult<QueuedPrompt> {
        if let Some(node_errors) = self.reject_with.lock().unwrap().clone() {
            return Err(AppError::GraphRejected {
                message: "Prompt outputs failed validation".into(),
                node_errors,
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(graph.to_value());
        Ok(QueuedPrompt {
            prompt_id: format!("prompt-{}", submitted.len()),
            number: Some(submitted.len() as i64),
        })
    }

    async fn history(&self, prompt_id: &str) -> AppResult<Option<HistoryEntry>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut script = self.history.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        match step.unwrap_or(HistoryStep::Missing) {
            HistoryStep::Missing => Ok(None),
            HistoryStep::Entry(mut value) => {
                if value.get("prompt").is_none() {
                    value["prompt"] = json!([0, prompt_id]);
                }
                Ok(Some(HistoryEntry::new(value)))
            }
            HistoryStep::Unavailable => Err(AppError::EngineUnavailable("connection refused".into())),
        }
    }

    async fn view(&self, file: &OutputFile) -> AppResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&file.filename)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no file '{}'", file.filename)))
    }

    async fn upload_image(&self, filename: &str, bytes: Vec<u8>) -> AppResult<String> {
        self.uploads.lock().unwrap().push((filename.to_string(), bytes));
        Ok(filename.to_string())
    }

    async fn system_stats(&self) -> AppResult<Value> {
        Ok(json!({"system": {"os": "test"}, "devices": []}))
    }
}
