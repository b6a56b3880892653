//! The execution engine seen from this layer: a trait for the handful of
//! endpoints we use, plus the reqwest-backed implementation.
use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppResult;
use crate::workflow::Graph;

pub mod client;
pub mod types;

pub use client::ComfyUIClient;
pub use types::{FileType, HistoryEntry, HistoryOutcome, OutputFile, QueuedPrompt};

#[async_trait]
pub trait Engine: Send + Sync {
    /// Queue a graph. Does not wait for execution.
    async fn submit(&self, graph: &Graph, client_id: &str) -> AppResult<QueuedPrompt>;

    /// History record for a prompt; `None` while the engine has none.
    async fn history(&self, prompt_id: &str) -> AppResult<Option<HistoryEntry>>;

    /// Raw bytes of a produced file.
    async fn view(&self, file: &OutputFile) -> AppResult<Vec<u8>>;

    /// Store an input image; returns the name to reference from a graph.
    async fn upload_image(&self, filename: &str, bytes: Vec<u8>) -> AppResult<String>;

    /// Engine liveness check.
    async fn system_stats(&self) -> AppResult<Value>;
}
