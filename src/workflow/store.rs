//! Loading named workflow templates from the workflows directory.
//!
//! `<dir>/<name>.json` holds the graph; an optional `<dir>/<name>.params.json`
//! sidecar holds the named-parameter table for that template. Parsed graphs
//! are cached and re-read when the file's modification time changes.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::prompt::params::ParameterTable;
use crate::workflow::graph::{Graph, GraphTemplate};

const PARAMS_SUFFIX: &str = ".params.json";

struct CachedTemplate {
    modified: SystemTime,
    template: Arc<GraphTemplate>,
}

pub struct TemplateStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, CachedTemplate>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TemplateStore {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load(&self, name: &str) -> AppResult<Arc<GraphTemplate>> {
        validate_name(name)?;
        let path = self.dir.join(format!("{}.json", name));
        let modified = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.modified()?,
            Ok(_) => return Err(not_found(name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(name)),
            Err(e) => return Err(e.into()),
        };

        if let Some(hit) = self.cached(name, modified) {
            return Ok(hit);
        }

        let raw = fs::read_to_string(&path).await?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Parse(format!("{}: {}", name, e)))?;
        let graph = Graph::from_value(value).map_err(|e| match e {
            AppError::Parse(msg) => AppError::Parse(format!("{}: {}", name, msg)),
            other => other,
        })?;
        let template = Arc::new(GraphTemplate::new(name, graph));
        tracing::info!(template = name, nodes = template.graph().len(), "loaded workflow template");

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                name.to_string(),
                CachedTemplate {
                    modified,
                    template: template.clone(),
                },
            );
        }
        Ok(template)
    }

    fn cached(&self, name: &str, modified: SystemTime) -> Option<Arc<GraphTemplate>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(name)
            .filter(|c| c.modified == modified)
            .map(|c| c.template.clone())
    }

    /// Named-parameter table for `name`; empty when no sidecar exists.
    pub async fn parameter_table(&self, name: &str) -> AppResult<ParameterTable> {
        validate_name(name)?;
        let path = self.dir.join(format!("{}{}", name, PARAMS_SUFFIX));
        match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| AppError::Parse(format!("{}{}: {}", name, PARAMS_SUFFIX, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParameterTable::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Template names currently present in the directory, sorted.
    pub async fn list(&self) -> AppResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("workflows directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if file_name.ends_with(PARAMS_SUFFIX) {
                continue;
            }
            if let Some(stem) = file_name.strip_suffix(".json") {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn not_found(name: &str) -> AppError {
    AppError::NotFound(format!("workflow template '{}' not found", name))
}

/// Template names are plain file stems: no separators, no parent references.
pub fn validate_name(name: &str) -> AppResult<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("invalid template name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn write(dir: &Path, file: &str, value: &Value) {
        std::fs::write(dir.join(file), serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn load_list_and_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "basic.json", &json!({"1": {"class_type": "CLIPTextEncode", "inputs": {"text": "a"}}}));
        write(tmp.path(), "basic.params.json", &json!({"positive_prompt": {"node": "1", "field": "text"}}));
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "ignored").unwrap();

        let store = TemplateStore::new(tmp.path());
        assert_eq!(store.list().await.unwrap(), vec!["basic", "broken"]);

        let template = store.load("basic").await.unwrap();
        assert_eq!(template.name(), "basic");
        assert_eq!(template.node_ids(), vec!["1"]);

        let table = store.parameter_table("basic").await.unwrap();
        assert_eq!(table.target("positive_prompt").unwrap().node, "1");
        assert!(store.parameter_table("broken").await.unwrap().is_empty());

        assert_eq!(store.load("missing").await.unwrap_err().kind(), "not_found");
        assert_eq!(store.load("broken").await.unwrap_err().kind(), "parse_error");
        assert_eq!(store.load("../etc/passwd").await.unwrap_err().kind(), "invalid_input");
    }

    #[tokio::test]
    async fn cache_is_reused_until_file_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.json");
        write(tmp.path(), "t.json", &json!({"1": {"class_type": "A", "inputs": {}}}));

        let store = TemplateStore::new(tmp.path());
        let first = store.load("t").await.unwrap();
        let second = store.load("t").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write(tmp.path(), "t.json", &json!({"1": {"class_type": "B", "inputs": {}}}));
        let later = SystemTime::now() + Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let reloaded = store.load("t").await.unwrap();
        assert_eq!(reloaded.graph().get("1").unwrap().class_type, "B");
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let store = TemplateStore::new("/definitely/not/here");
        assert!(store.list().await.unwrap().is_empty());
    }
}
