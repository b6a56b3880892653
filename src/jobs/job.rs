use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comfyui::OutputFile;
use crate::output::convert::ConvertOptions;
use crate::output::ResolvedOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }
}

/// What one poll learned about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Engine reachable, no terminal record yet.
    Pending,
    Completed(Vec<OutputFile>),
    Failed(String),
    TimedOut(String),
}

/// Per-job options carried from submission to resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_output: Option<ConvertOptions>,
}

/// Tracking record for one submitted graph.
///
/// The engine prompt id is fixed at construction. Status only moves forward
/// (`queued -> running -> terminal`) and never leaves a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    id: Uuid,
    prompt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    status: JobStatus,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    output_files: Vec<OutputFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip)]
    options: JobOptions,
    #[serde(skip)]
    resolved: Option<Arc<Vec<ResolvedOutput>>>,
}

impl Job {
    pub fn new(id: Uuid, prompt_id: impl Into<String>, template: Option<String>, options: JobOptions) -> Self {
        Job {
            id,
            prompt_id: prompt_id.into(),
            template,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            output_files: Vec::new(),
            error: None,
            options,
            resolved: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn output_files(&self) -> &[OutputFile] {
        &self.output_files
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Deliverable outputs, once they have been resolved.
    pub fn resolved_outputs(&self) -> Option<&Arc<Vec<ResolvedOutput>>> {
        self.resolved.as_ref()
    }

    /// Keep the first resolution of a completed job's outputs.
    pub(crate) fn attach_outputs(&mut self, outputs: Arc<Vec<ResolvedOutput>>) -> bool {
        if self.status != JobStatus::Completed || self.resolved.is_some() {
            return false;
        }
        self.resolved = Some(outputs);
        true
    }

    /// Apply an observation. Returns whether the job changed.
    pub(crate) fn observe(&mut self, observation: Observation) -> bool {
        if self.is_terminal() {
            return false;
        }
        match observation {
            Observation::Pending => {
                if self.status == JobStatus::Queued {
                    self.status = JobStatus::Running;
                    return true;
                }
                false
            }
            Observation::Completed(files) => {
                self.output_files = files;
                self.finish(JobStatus::Completed, None);
                true
            }
            Observation::Failed(message) => {
                self.finish(JobStatus::Failed, Some(message));
                true
            }
            Observation::TimedOut(message) => {
                self.finish(JobStatus::Timeout, Some(message));
                true
            }
        }
    }

    fn finish(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}
