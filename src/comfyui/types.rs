//! Wire types for the engine's `/prompt`, `/history` and `/view` endpoints.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Response of a successful `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    #[serde(default)]
    pub number: Option<i64>,
}

/// Engine folder an output lives in. Part of the `/view` addressing triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Output,
    Input,
    Temp,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Output => "output",
            FileType::Input => "input",
            FileType::Temp => "temp",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "output" => Ok(FileType::Output),
            "input" => Ok(FileType::Input),
            "temp" => Ok(FileType::Temp),
            other => Err(AppError::InvalidInput(format!(
                "file type must be output, input or temp, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file produced by a node, as reported in the history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl OutputFile {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>, file_type: FileType) -> Self {
        OutputFile {
            filename: filename.into(),
            subfolder: subfolder.into(),
            file_type,
            node_id: None,
        }
    }
}

/// What a history record says about a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOutcome {
    /// Record exists but is not terminal.
    Pending,
    Completed(Vec<OutputFile>),
    Failed(String),
}

/// One prompt's entry from `GET /history/{prompt_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    raw: Value,
}

impl HistoryEntry {
    pub fn new(raw: Value) -> Self {
        HistoryEntry { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Failure is only reported when the engine says so; an `outputs`
    /// section otherwise means completion.
    pub fn outcome(&self) -> HistoryOutcome {
        let status = self.raw.get("status");
        let status_str = status.and_then(|s| s.get("status_str")).and_then(Value::as_str);
        let explicitly_incomplete = status
            .and_then(|s| s.get("completed"))
            .and_then(Value::as_bool)
            == Some(false);
        let error = self.execution_error();

        if status_str == Some("error") || (explicitly_incomplete && error.is_some()) {
            return HistoryOutcome::Failed(error.unwrap_or_else(|| "execution failed".to_string()));
        }
        if self.raw.get("outputs").map_or(false, Value::is_object) {
            return HistoryOutcome::Completed(self.output_files());
        }
        HistoryOutcome::Pending
    }

    fn execution_error(&self) -> Option<String> {
        let messages = self.raw.get("status")?.get("messages")?.as_array()?;
        messages.iter().find_map(|m| {
            let pair = m.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            let data = pair.get(1)?;
            let message = data
                .get("exception_message")
                .and_then(Value::as_str)
                .unwrap_or("execution error")
                .trim();
            Some(match data.get("node_id").and_then(Value::as_str) {
                Some(node) => {
                    let node_type = data.get("node_type").and_then(Value::as_str).unwrap_or("?");
                    format!("node {} ({}): {}", node, node_type, message)
                }
                None => message.to_string(),
            })
        })
    }

    /// Every `{filename, subfolder, type}` listed under any node's outputs,
    /// in node order (`images`, `videos`, `gifs`, `audio`, ...).
    pub fn output_files(&self) -> Vec<OutputFile> {
        let Some(outputs) = self.raw.get("outputs").and_then(Value::as_object) else {
            return Vec::new();
        };
        let mut files = Vec::new();
        for (node_id, node_output) in outputs {
            let Some(kinds) = node_output.as_object() else { continue };
            for items in kinds.values().filter_map(Value::as_array) {
                for item in items {
                    let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                        continue;
                    };
                    let subfolder = item.get("subfolder").and_then(Value::as_str).unwrap_or("");
                    let file_type = item
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(|t| FileType::parse(t).ok())
                        .unwrap_or(FileType::Output);
                    let mut file = OutputFile::new(filename, subfolder, file_type);
                    file.node_id = Some(node_id.clone());
                    files.push(file);
                }
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_section_means_completed() {
        let entry = HistoryEntry::new(json!({
            "outputs": {
                "94": {"gifs": [{"filename": "final_00001.mp4", "subfolder": "", "type": "output", "format": "video/h264-mp4"}]},
                "9": {"images": [{"filename": "preview.png", "subfolder": "previews", "type": "temp"}], "animated": [false]}
            },
            "status": {"status_str": "success", "completed": true, "messages": []}
        }));
        match entry.outcome() {
            HistoryOutcome::Completed(files) => {
                assert_eq!(files.len(), 2);
                assert_eq!(files[0].filename, "final_00001.mp4");
                assert_eq!(files[0].node_id.as_deref(), Some("94"));
                assert_eq!(files[1].file_type, FileType::Temp);
                assert_eq!(files[1].subfolder, "previews");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn engine_error_is_failure_even_with_outputs() {
        let entry = HistoryEntry::new(json!({
            "outputs": {},
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", {"prompt_id": "abc"}],
                    ["execution_error", {"node_id": "12", "node_type": "WanVideoSampler", "exception_message": "CUDA out of memory\n"}]
                ]
            }
        }));
        assert_eq!(
            entry.outcome(),
            HistoryOutcome::Failed("node 12 (WanVideoSampler): CUDA out of memory".into())
        );
    }

    #[test]
    fn record_without_outputs_is_pending() {
        let entry = HistoryEntry::new(json!({"prompt": [1, "abc"], "status": {"completed": false, "messages": []}}));
        assert_eq!(entry.outcome(), HistoryOutcome::Pending);
    }

    #[test]
    fn output_file_serializes_engine_triple() {
        let file = OutputFile::new("a.mp4", "sub", FileType::Output);
        assert_eq!(
            serde_json::to_value(&file).unwrap(),
            json!({"filename": "a.mp4", "subfolder": "sub", "type": "output"})
        );
        assert!(FileType::parse("secret").is_err());
    }
}
