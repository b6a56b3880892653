//! Output transcoding through an external media tool (ffmpeg).
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{AppError, AppResult};

/// Requested container/codec change for a job's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Target container, used as the output extension (e.g. `webm`, `gif`).
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ConvertOptions {
    pub fn validate(&self) -> AppResult<()> {
        let format_ok = !self.format.is_empty()
            && self.format.len() <= 8
            && self.format.chars().all(|c| c.is_ascii_alphanumeric());
        if !format_ok {
            return Err(AppError::InvalidInput(format!(
                "unsupported output format '{}'",
                self.format
            )));
        }
        if let Some(codec) = &self.codec {
            if codec.is_empty() || !codec.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(AppError::InvalidInput(format!("unsupported codec '{}'", codec)));
            }
        }
        Ok(())
    }

    /// `name.ext` -> `name.<format>`.
    pub fn target_name(&self, source_name: &str) -> String {
        let stem = Path::new(source_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output");
        format!("{}.{}", stem, self.format)
    }
}

#[derive(Debug, Clone)]
pub struct MediaConverter {
    program: String,
}

impl MediaConverter {
    pub fn new(program: impl Into<String>) -> Self {
        MediaConverter {
            program: program.into(),
        }
    }

    fn build_args(&self, input: &Path, output: &Path, options: &ConvertOptions) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.display().to_string(),
        ];
        if let Some(codec) = &options.codec {
            args.push("-c:v".to_string());
            args.push(codec.clone());
        }
        args.extend(options.args.iter().cloned());
        args.push(output.display().to_string());
        args
    }

    /// Convert `bytes` (named `source_name`) and return `(bytes, new_name)`.
    pub async fn convert(
        &self,
        bytes: &[u8],
        source_name: &str,
        options: &ConvertOptions,
    ) -> AppResult<(Vec<u8>, String)> {
        options.validate()?;
        let scratch = tempfile::tempdir()?;
        let source_ext = Path::new(source_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let input = scratch.path().join(format!("source.{}", source_ext));
        let target_name = options.target_name(source_name);
        let output = scratch.path().join(format!("converted.{}", options.format));
        tokio::fs::write(&input, bytes).await?;

        let args = self.build_args(&input, &output, options);
        tracing::debug!(cmd = %format!("{} {}", self.program, args.join(" ")), "running conversion");
        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Conversion(format!("failed to launch {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim();
            return Err(AppError::Conversion(format!(
                "{} exited with {}: {}",
                self.program, result.status, last_line
            )));
        }
        let converted = match tokio::fs::read(&output).await {
            Ok(data) => data,
            Err(_) => {
                return Err(AppError::Conversion(format!(
                    "{} produced no output file",
                    self.program
                )))
            }
        };
        if converted.is_empty() {
            return Err(AppError::Conversion(format!("{} produced an empty file", self.program)));
        }
        tracing::info!(from = source_name, to = %target_name, bytes = converted.len(), "converted output");
        Ok((converted, target_name))
    }
}
