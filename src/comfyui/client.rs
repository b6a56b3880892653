//! Thin HTTP client for ComfyUI endpoints.
//!
//! - `submit` posts `{"prompt", "client_id"}` to `/prompt`.
//! - `history` fetches `/history/{prompt_id}`.
//! - `view` proxies to `/view?filename=&subfolder=&type=` and returns raw bytes.
//! - `upload_image` posts multipart data to `/upload/image`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::comfyui::types::{HistoryEntry, OutputFile, QueuedPrompt};
use crate::comfyui::Engine;
use crate::error::{AppError, AppResult};
use crate::workflow::Graph;

#[derive(Clone)]
pub struct ComfyUIClient {
    client: Client,
    base_url: Url,
}

impl ComfyUIClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid COMFYUI_URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!("COMFYUI_URL '{}' is not a base URL", base_url)));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(ComfyUIClient { client, base_url })
    }

    /// `base_url` with `segments` appended to its path, each one escaped.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL of a file on the engine's `/view` endpoint.
    pub fn view_url(&self, file: &OutputFile) -> Url {
        let mut url = self.endpoint(&["view"]);
        url.query_pairs_mut()
            .append_pair("filename", &file.filename)
            .append_pair("subfolder", &file.subfolder)
            .append_pair("type", file.file_type.as_str());
        url
    }

    async fn error_body(response: Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string())
    }
}

/// Connection-level failures mean the engine is unavailable; anything else
/// is a client error.
fn send_error(e: reqwest::Error) -> AppError {
    if e.is_connect() || e.is_timeout() {
        AppError::EngineUnavailable(e.to_string())
    } else {
        AppError::HttpClient(e)
    }
}

/// Engine validation failures come back as `{"error": {...}, "node_errors": {...}}`.
fn rejection_from(body: &Value) -> Option<AppError> {
    let node_errors = body.get("node_errors").cloned().unwrap_or(Value::Null);
    let has_node_errors = node_errors.as_object().map_or(false, |m| !m.is_empty());
    let error = body.get("error");
    if error.is_none() && !has_node_errors {
        return None;
    }
    let message = error
        .and_then(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .or_else(|| e.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "graph failed validation".to_string());
    Some(AppError::GraphRejected {
        message,
        node_errors,
    })
}

#[async_trait]
impl Engine for ComfyUIClient {
    async fn submit(&self, graph: &Graph, client_id: &str) -> AppResult<QueuedPrompt> {
        let url = self.endpoint(&["prompt"]);
        tracing::info!(nodes = graph.len(), "Sending prompt to ComfyUI at URL: {}", url);
        let body = json!({"prompt": graph, "client_id": client_id});
        tracing::debug!("Prompt payload: {}", body);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response.json().await.map_err(AppError::HttpClient)?;
            if let Some(rejected) = rejection_from(&json) {
                return Err(rejected);
            }
            let queued: QueuedPrompt = serde_json::from_value(json.clone()).map_err(|_| {
                AppError::Engine(format!("response without prompt_id: {}", json))
            })?;
            tracing::info!(prompt_id = %queued.prompt_id, "Successfully queued prompt");
            Ok(queued)
        } else {
            let error_body = Self::error_body(response).await;
            if status == StatusCode::BAD_REQUEST {
                if let Some(rejected) = serde_json::from_str::<Value>(&error_body)
                    .ok()
                    .as_ref()
                    .and_then(rejection_from)
                {
                    tracing::warn!("ComfyUI rejected prompt: {}", rejected);
                    return Err(rejected);
                }
            }
            let error_message = format!("Failed to queue prompt. Status: {}, Body: {}", status, error_body);
            tracing::error!("{}", error_message);
            Err(AppError::Engine(error_message))
        }
    }

    async fn history(&self, prompt_id: &str) -> AppResult<Option<HistoryEntry>> {
        let url = self.endpoint(&["history", prompt_id]);
        let response = self.client.get(url).send().await.map_err(send_error)?;

        match response.status() {
            s if s.is_success() => {
                let mut json: Value = response.json().await.map_err(AppError::HttpClient)?;
                Ok(json
                    .get_mut(prompt_id)
                    .filter(|entry| entry.is_object())
                    .map(|entry| HistoryEntry::new(entry.take())))
            }
            StatusCode::NOT_FOUND => Ok(None),
            s => Err(AppError::Engine(format!("Failed to get history: {:?}", s))),
        }
    }

    async fn view(&self, file: &OutputFile) -> AppResult<Vec<u8>> {
        let response = self
            .client
            .get(self.view_url(file))
            .send()
            .await
            .map_err(send_error)?;

        match response.status() {
            s if s.is_success() => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(AppError::HttpClient),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!(
                "engine has no {} file '{}'",
                file.file_type, file.filename
            ))),
            s => Err(AppError::Engine(format!("Failed to get file: {:?}", s))),
        }
    }

    async fn upload_image(&self, filename: &str, bytes: Vec<u8>) -> AppResult<String> {
        let url = self.endpoint(&["upload", "image"]);
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::error_body(response).await;
            return Err(AppError::Engine(format!(
                "Failed to upload image. Status: {}, Body: {}",
                status, body
            )));
        }
        let json: Value = response.json().await.map_err(AppError::HttpClient)?;
        let name = json
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Engine(format!("upload response without name: {}", json)))?;
        let subfolder = json.get("subfolder").and_then(Value::as_str).unwrap_or("");
        tracing::info!(name, subfolder, "uploaded input image");
        Ok(if subfolder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", subfolder, name)
        })
    }

    async fn system_stats(&self) -> AppResult<Value> {
        let url = self.endpoint(&["system_stats"]);
        let response = self.client.get(url).send().await.map_err(send_error)?;
        if response.status().is_success() {
            response.json().await.map_err(AppError::HttpClient)
        } else {
            Err(AppError::Engine(format!(
                "Failed to get system stats: {:?}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comfyui::types::FileType;

    #[test]
    fn view_url_encodes_the_addressing_triple() {
        let client = ComfyUIClient::new("http://engine:8188/", Duration::from_secs(1)).unwrap();
        let file = OutputFile::new("clip 01.mp4", "wan/run", FileType::Output);
        assert_eq!(
            client.view_url(&file).as_str(),
            "http://engine:8188/view?filename=clip+01.mp4&subfolder=wan%2Frun&type=output"
        );
    }

    #[test]
    fn endpoint_segments_are_escaped() {
        let client = ComfyUIClient::new("http://engine:8188/comfy/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint(&["history", "a/b c"]).as_str(),
            "http://engine:8188/comfy/history/a%2Fb%20c"
        );
        let bare = ComfyUIClient::new("http://engine:8188", Duration::from_secs(1)).unwrap();
        assert_eq!(bare.endpoint(&["prompt"]).as_str(), "http://engine:8188/prompt");
    }

    #[test]
    fn base_url_must_parse() {
        let err = ComfyUIClient::new("engine:8188:x", Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.kind(), "config_error");
        let err = ComfyUIClient::new("not a url", Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn rejection_requires_error_or_node_errors() {
        assert!(rejection_from(&json!({"prompt_id": "a", "node_errors": {}})).is_none());
        let err = rejection_from(&json!({
            "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation"},
            "node_errors": {"12": {"errors": []}}
        }))
        .unwrap();
        match err {
            AppError::GraphRejected { message, node_errors } => {
                assert_eq!(message, "Prompt outputs failed validation");
                assert!(node_errors.get("12").is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
