//! Env-driven configuration for the service and library.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binaries. Defaults are provided for convenience during development.
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    pub comfyui_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub workflows_dir: PathBuf,
    pub default_workflow: Option<String>,
    pub sync_mode: bool,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub request_timeout: Duration,
    /// How long finished jobs stay queryable.
    pub job_retention: Duration,
    pub webhook_url: Option<String>,
    pub ffmpeg_path: String,
    pub bucket: Option<BucketConfig>,
}

/// Object storage settings; present only when every credential is set.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub endpoint_url: String,
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_url: Option<String>,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> AppResult<Self> {
        Ok(Config {
            comfyui_url: var_or("COMFYUI_URL", "http://127.0.0.1:8188"),
            api_host: var_or("API_HOST", "0.0.0.0"),
            api_port: parse_var("API_PORT", 8189)?,
            workflows_dir: PathBuf::from(var_or("WORKFLOWS_DIR", "./workflows")),
            default_workflow: optional_var("DEFAULT_WORKFLOW"),
            sync_mode: parse_bool_var("SYNC_MODE", false)?,
            poll_interval: secs_var("POLL_INTERVAL_SECS", 5)?,
            job_timeout: secs_var("JOB_TIMEOUT_SECS", 1800)?,
            request_timeout: secs_var("REQUEST_TIMEOUT_SECS", 30)?,
            job_retention: secs_var("JOB_RETENTION_SECS", 86400)?,
            webhook_url: optional_var("WEBHOOK_URL"),
            ffmpeg_path: var_or("FFMPEG_PATH", "ffmpeg"),
            bucket: BucketConfig::from_env(),
        })
    }

    /// Log the effective configuration. Credentials are never printed.
    pub fn print_env_vars(&self) {
        tracing::info!("COMFYUI_URL: {}", self.comfyui_url);
        tracing::info!("API_HOST: {}", self.api_host);
        tracing::info!("API_PORT: {}", self.api_port);
        tracing::info!("WORKFLOWS_DIR: {}", self.workflows_dir.display());
        tracing::info!(
            "DEFAULT_WORKFLOW: {}",
            self.default_workflow.as_deref().unwrap_or("<unset>")
        );
        tracing::info!("SYNC_MODE: {}", self.sync_mode);
        tracing::info!("POLL_INTERVAL_SECS: {}", self.poll_interval.as_secs());
        tracing::info!("JOB_TIMEOUT_SECS: {}", self.job_timeout.as_secs());
        tracing::info!("JOB_RETENTION_SECS: {}", self.job_retention.as_secs());
        tracing::info!(
            "WEBHOOK_URL: {}",
            if self.webhook_url.is_some() { "<set>" } else { "<unset>" }
        );
        match &self.bucket {
            Some(b) => tracing::info!("BUCKET: {} @ {}", b.bucket_name, b.endpoint_url),
            None => tracing::info!("BUCKET: <disabled>"),
        }
    }
}

impl BucketConfig {
    fn from_env() -> Option<Self> {
        Some(BucketConfig {
            endpoint_url: optional_var("BUCKET_ENDPOINT_URL")?,
            bucket_name: optional_var("BUCKET_NAME")?,
            access_key_id: optional_var("BUCKET_ACCESS_KEY_ID")?,
            secret_access_key: optional_var("BUCKET_SECRET_ACCESS_KEY")?,
            public_url: optional_var("BUCKET_PUBLIC_URL"),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match optional_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

/// Whole seconds, strictly positive.
fn secs_var(key: &str, default: u64) -> AppResult<Duration> {
    match parse_var(key, default)? {
        0 => Err(AppError::Config(format!("{} must be at least 1", key))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool_var(key: &str, default: bool) -> AppResult<bool> {
    match optional_var(key) {
        None => Ok(default),
        Some(raw) => parse_flag(&raw)
            .ok_or_else(|| AppError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
