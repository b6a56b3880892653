//! Turns a completed job's file references into deliverable media.
//!
//! Each output is fetched from the engine by its `{filename, subfolder, type}`
//! triple, optionally converted, then either uploaded to object storage
//! (returned as a URL) or returned inline. A failed upload degrades to the
//! inline form.
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use uuid::Uuid;

use crate::comfyui::{Engine, FileType, OutputFile};
use crate::error::{AppError, AppResult};
use crate::jobs::{Job, JobStatus};
use crate::output::convert::{ConvertOptions, MediaConverter};
use crate::output::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq)]
pub enum OutputPayload {
    Url(String),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    pub filename: String,
    pub content_type: String,
    pub node_id: Option<String>,
    pub payload: OutputPayload,
}

impl ResolvedOutput {
    pub fn is_inline(&self) -> bool {
        matches!(self.payload, OutputPayload::Inline(_))
    }

    /// Storage URL, or a `data:` URL carrying the bytes.
    pub fn media_url(&self) -> String {
        match &self.payload {
            OutputPayload::Url(url) => url.clone(),
            OutputPayload::Inline(bytes) => {
                format!("data:{};base64,{}", self.content_type, BASE64.encode(bytes))
            }
        }
    }
}

impl Serialize for ResolvedOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ResolvedOutput", 4)?;
        s.serialize_field("filename", &self.filename)?;
        s.serialize_field("content_type", &self.content_type)?;
        if let Some(node_id) = &self.node_id {
            s.serialize_field("node_id", node_id)?;
        }
        match &self.payload {
            OutputPayload::Url(url) => s.serialize_field("url", url)?,
            OutputPayload::Inline(bytes) => s.serialize_field("data", &BASE64.encode(bytes))?,
        }
        s.end()
    }
}

pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub struct OutputResolver {
    engine: Arc<dyn Engine>,
    converter: MediaConverter,
    store: Option<Arc<dyn ObjectStore>>,
}

impl OutputResolver {
    pub fn new(engine: Arc<dyn Engine>, converter: MediaConverter) -> Self {
        OutputResolver {
            engine,
            converter,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Resolve every output of a completed job, in history order.
    pub async fn resolve(&self, job: &Job) -> AppResult<Vec<ResolvedOutput>> {
        ensure_completed(job)?;
        let convert = job.options().convert_output.as_ref();
        let mut resolved = Vec::with_capacity(job.output_files().len());
        for file in job.output_files() {
            resolved.push(self.resolve_file(job.id(), file, convert, true).await?);
        }
        Ok(resolved)
    }

    /// Fetch one output and shape it. Conversion only touches `output` files;
    /// `temp` previews pass through unchanged.
    pub async fn resolve_file(
        &self,
        job_id: Uuid,
        file: &OutputFile,
        convert: Option<&ConvertOptions>,
        upload: bool,
    ) -> AppResult<ResolvedOutput> {
        let mut bytes = self.engine.view(file).await?;
        let mut filename = file.filename.clone();
        if let Some(options) = convert.filter(|_| file.file_type == FileType::Output) {
            let (converted, name) = self.converter.convert(&bytes, &filename, options).await?;
            bytes = converted;
            filename = name;
        }
        let content_type = content_type_for(&filename);

        let payload = match (&self.store, upload) {
            (Some(store), true) => {
                let key = format!("{}/{}", job_id, filename);
                match store.put(&key, bytes.clone(), &content_type).await {
                    Ok(url) => OutputPayload::Url(url),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, file = %filename, "upload failed, returning inline bytes: {}", e);
                        OutputPayload::Inline(bytes)
                    }
                }
            }
            _ => OutputPayload::Inline(bytes),
        };

        Ok(ResolvedOutput {
            filename,
            content_type,
            node_id: file.node_id.clone(),
            payload,
        })
    }
}

fn ensure_completed(job: &Job) -> AppResult<()> {
    if job.status() == JobStatus::Completed {
        return Ok(());
    }
    Err(AppError::InvalidInput(format!(
        "job {} is {}, outputs are only available once completed",
        job.id(),
        job.status().as_str()
    )))
}
