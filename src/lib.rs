//! ComfyUI job gateway library
//!
//! Modules:
//! - `api`: Axum handlers and router used by the binary (REST and serverless `/run`).
//! - `comfyui`: The `Engine` seam and its HTTP client for ComfyUI REST endpoints.
//! - `workflow`: Graph types, UI-format conversion and the template directory store.
//! - `prompt`: Node overrides, named parameters and their per-template routing table.
//! - `jobs`: Job records, the in-memory job table and the poll-based tracker.
//! - `output`: Output fetching, ffmpeg conversion and object storage.
//! - `notify`: Webhook delivery.
//! - `service`: The `Gateway` tying the pieces into one submission pipeline.
//! - `utils`: Input image handling and `--set` parsing for the CLI.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error type and alias.
//!
//! Re-exports are provided for common types: `Config`, `ComfyUIClient`,
//! `Gateway`, `TemplateStore` and `JobTracker`.
pub mod api;
pub mod comfyui;
pub mod config;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod output;
pub mod prompt;
pub mod service;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use comfyui::client::ComfyUIClient;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use jobs::JobTracker;
pub use service::Gateway;
pub use workflow::TemplateStore;
