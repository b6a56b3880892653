//! The submission pipeline shared by the REST, serverless and CLI fronts:
//! template -> overrides -> staged input image -> engine -> tracked job ->
//! resolved outputs -> webhook.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::comfyui::{ComfyUIClient, Engine};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::jobs::{Job, JobOptions, JobStatus, JobStore, JobTracker, PollSchedule};
use crate::notify::{Notifier, NotifierConfig};
use crate::output::{ConvertOptions, HttpObjectStore, MediaConverter, ObjectStore, OutputResolver, ResolvedOutput};
use crate::prompt::{apply, GenerateParams, NodeOverrides};
use crate::utils::ImageSource;
use crate::workflow::{NodeId, NodeInfo, TemplateStore};

/// Body of a generation request. Keys other than the ones below are named
/// parameters ([`GenerateParams`]) routed through the template's table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, alias = "workflow_name", alias = "workflow")]
    pub template: Option<String>,
    #[serde(default)]
    pub node_updates: NodeOverrides,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub convert_output: Option<ConvertOptions>,
    #[serde(default)]
    pub wait: Option<bool>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub job: Job,
    pub params: Option<GenerateParams>,
    /// Named parameters the template's table routed into the graph.
    pub applied: Vec<String>,
}

impl Submitted {
    pub fn was_applied(&self, name: &str) -> bool {
        self.applied.iter().any(|n| n == name)
    }
}

#[derive(Debug)]
pub struct Completion {
    pub job: Job,
    pub outputs: Vec<ResolvedOutput>,
    /// Detached webhook delivery; resolves to whether it was accepted.
    pub webhook: Option<JoinHandle<bool>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub engine: &'static str,
    pub engine_url: String,
    pub jobs: usize,
    pub templates: usize,
}

pub struct Gateway {
    templates: TemplateStore,
    engine: Arc<dyn Engine>,
    tracker: JobTracker,
    resolver: OutputResolver,
    notifier: Notifier,
    http: reqwest::Client,
    client_id: String,
    schedule: PollSchedule,
    retention: Duration,
    engine_url: String,
    default_template: Option<String>,
    default_webhook: Option<String>,
    sync_mode: bool,
}

impl Gateway {
    /// Wire up the real engine client and, when configured, object storage.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let engine = Arc::new(ComfyUIClient::new(&config.comfyui_url, config.request_timeout)?);
        let store: Option<Arc<dyn ObjectStore>> = match &config.bucket {
            Some(bucket) => Some(Arc::new(HttpObjectStore::new(bucket.clone(), config.request_timeout)?)),
            None => None,
        };
        Gateway::with_engine(config, engine, store)
    }

    pub fn with_engine(
        config: &Config,
        engine: Arc<dyn Engine>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> AppResult<Self> {
        let jobs = Arc::new(JobStore::new());
        let mut resolver = OutputResolver::new(engine.clone(), MediaConverter::new(config.ffmpeg_path.clone()));
        if let Some(store) = store {
            resolver = resolver.with_store(store);
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(Gateway {
            templates: TemplateStore::new(config.workflows_dir.clone()),
            tracker: JobTracker::new(engine.clone(), jobs),
            engine,
            resolver,
            notifier: Notifier::new(NotifierConfig::default())?,
            http,
            client_id: format!("comfy-gateway-{}", Uuid::new_v4().simple()),
            schedule: PollSchedule::new(config.poll_interval, config.job_timeout),
            retention: config.job_retention,
            engine_url: config.comfyui_url.clone(),
            default_template: config.default_workflow.clone(),
            default_webhook: config.webhook_url.clone(),
            sync_mode: config.sync_mode,
        })
    }

    pub fn engine_url(&self) -> &str {
        &self.engine_url
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        self.tracker.jobs()
    }

    pub fn has_object_store(&self) -> bool {
        self.resolver.has_store()
    }

    /// Whether a request should block until its job is terminal.
    pub fn should_wait(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.sync_mode)
    }

    pub async fn templates(&self) -> AppResult<Vec<String>> {
        self.templates.list().await
    }

    pub async fn template_info(&self, name: &str) -> AppResult<indexmap::IndexMap<NodeId, NodeInfo>> {
        Ok(self.templates.load(name).await?.node_info())
    }

    /// Build the graph and queue it on the engine.
    ///
    /// Template and parameter problems are reported before the engine is
    /// contacted. The input image, if any, is staged only once the graph is
    /// known to be valid.
    pub async fn submit(&self, request: GenerateRequest) -> AppResult<Submitted> {
        let name = request
            .template
            .clone()
            .or_else(|| self.default_template.clone())
            .ok_or_else(|| {
                AppError::InvalidInput("no template given and DEFAULT_WORKFLOW is unset".into())
            })?;
        let template = self.templates.load(&name).await?;
        if let Some(convert) = &request.convert_output {
            convert.validate()?;
        }

        let job_id = Uuid::new_v4();
        let params = if request.params.is_empty() {
            None
        } else {
            Some(GenerateParams::from_map(request.params)?)
        };
        let image = match params.as_ref().and_then(|p| p.image.as_deref()) {
            Some(raw) => {
                let source = ImageSource::parse(raw)?;
                let planned = format!("input_{}.{}", job_id.simple(), source.extension());
                Some((source, planned))
            }
            None => None,
        };

        let table = self.templates.parameter_table(&name).await?;
        let mut overrides = NodeOverrides::new();
        let mut applied = Vec::new();
        if let Some(params) = &params {
            if table.is_empty() {
                tracing::warn!(template = %name, "template has no parameter table, named parameters ignored");
            }
            let named = params.named_values(image.as_ref().map(|(_, n)| n.as_str()));
            applied = named.keys().filter(|k| table.target(k).is_some()).cloned().collect();
            overrides = table.overrides(&named);
        }
        overrides.extend(request.node_updates);
        let mut graph = apply(&template, &overrides)?;

        if let Some((source, planned)) = image {
            let bytes = source.fetch(&self.http).await?;
            let staged = self.engine.upload_image(&planned, bytes).await?;
            if staged != planned {
                if let Some(target) = table.target("image") {
                    overrides.set(target.node.clone(), target.field.clone(), Value::String(staged));
                    graph = apply(&template, &overrides)?;
                }
            }
        }

        let queued = self.engine.submit(&graph, &self.client_id).await?;
        let options = JobOptions {
            webhook: request.webhook.or_else(|| self.default_webhook.clone()),
            convert_output: request.convert_output,
        };
        let job = Job::new(job_id, queued.prompt_id, Some(name), options);
        self.jobs().insert(job.clone()).await;
        tracing::info!(
            job_id = %job.id(),
            prompt_id = %job.prompt_id(),
            template = job.template().unwrap_or(""),
            overrides = overrides.len(),
            "job submitted"
        );
        Ok(Submitted { job, params, applied })
    }

    /// One status check. Transient engine errors return the stored job as is.
    pub async fn check(&self, id: Uuid) -> AppResult<Job> {
        match self.tracker.check(id).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(job_id = %id, "status check could not reach the engine: {}", e);
                self.jobs()
                    .get(id)
                    .await
                    .ok_or_else(|| AppError::NotFound(format!("job '{}' not found", id)))
            }
            other => other,
        }
    }

    /// Wait for a terminal state, resolve outputs and fire the job's webhook.
    /// The webhook is delivered on its own task and never delays the result.
    pub async fn run_to_completion(&self, id: Uuid) -> AppResult<Completion> {
        let job = self.tracker.wait(id, self.schedule).await?;
        let outputs = if job.status() == JobStatus::Completed {
            self.outputs(&job).await
        } else {
            Ok(Arc::new(Vec::new()))
        };
        let webhook = job
            .options()
            .webhook
            .clone()
            .map(|url| self.notify_in_background(url, webhook_payload(&job, &outputs)));
        let outputs = outputs?;
        Ok(Completion {
            job,
            outputs: Vec::clone(&outputs),
            webhook,
        })
    }

    /// Background variant of [`Gateway::run_to_completion`] for async mode.
    pub fn spawn_watch(self: &Arc<Self>, id: Uuid) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            match gateway.run_to_completion(id).await {
                Ok(done) => tracing::debug!(job_id = %id, status = done.job.status().as_str(), "watch finished"),
                Err(e) => tracing::warn!(job_id = %id, "watch ended with error: {}", e),
            }
        })
    }

    /// Periodically forget jobs that finished longer than the retention ago.
    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let period = gateway.retention.clamp(Duration::from_secs(1), Duration::from_secs(600));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = gateway.jobs().prune_finished(gateway.retention).await;
                if removed > 0 {
                    tracing::info!(removed, "pruned finished jobs");
                }
            }
        })
    }

    /// Fetch one output of a completed job.
    pub async fn download(&self, id: Uuid, index: usize) -> AppResult<ResolvedOutput> {
        let job = self
            .jobs()
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("job '{}' not found", id)))?;
        if job.status() != JobStatus::Completed {
            return Err(AppError::InvalidInput(format!(
                "job {} is {}, nothing to download yet",
                id,
                job.status().as_str()
            )));
        }
        if index >= job.output_files().len() {
            return Err(AppError::NotFound(format!("job {} has no output #{}", id, index)));
        }
        let outputs = self.outputs(&job).await?;
        outputs
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job {} has no output #{}", id, index)))
    }

    /// Outputs of a completed job. Resolved (fetched, converted, uploaded)
    /// on first use and kept on the job afterwards.
    async fn outputs(&self, job: &Job) -> AppResult<Arc<Vec<ResolvedOutput>>> {
        if let Some(outputs) = job.resolved_outputs() {
            return Ok(Arc::clone(outputs));
        }
        let outputs = Arc::new(self.resolver.resolve(job).await?);
        let kept = self
            .jobs()
            .update(job.id(), |stored| stored.attach_outputs(Arc::clone(&outputs)))
            .await
            .and_then(|(stored, _)| stored.resolved_outputs().cloned());
        Ok(kept.unwrap_or(outputs))
    }

    fn notify_in_background(&self, url: String, payload: Value) -> JoinHandle<bool> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move { notifier.notify(&url, &payload).await })
    }

    pub async fn health(&self) -> HealthReport {
        let engine = match self.engine.system_stats().await {
            Ok(_) => "up",
            Err(e) => {
                tracing::debug!("engine health check failed: {}", e);
                "down"
            }
        };
        HealthReport {
            status: "ok",
            engine,
            engine_url: self.engine_url.clone(),
            jobs: self.jobs().len().await,
            templates: self.templates.list().await.map(|t| t.len()).unwrap_or(0),
        }
    }
}

fn webhook_payload(job: &Job, outputs: &AppResult<Arc<Vec<ResolvedOutput>>>) -> Value {
    let mut payload = match serde_json::to_value(job) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => json!({"job_id": job.id()}),
    };
    match outputs {
        Ok(outputs) => payload["outputs"] = json!(outputs.as_slice()),
        Err(e) => payload["resolve_error"] = e.to_body(),
    }
    payload
}
