//! Node graphs in the engine's API format.
//!
//! A graph is an ordered mapping of node id to `{class_type, inputs, ...}`.
//! Fields this layer does not understand (`_meta`, `widgets_values`, titles)
//! are kept verbatim in each node's `extra` bag and round-trip unchanged.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::workflow::ui_format;

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeDescriptor {
    pub fn new(class_type: impl Into<String>) -> Self {
        NodeDescriptor {
            class_type: class_type.into(),
            inputs: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_input(mut self, key: &str, value: Value) -> Self {
        self.inputs.insert(key.to_string(), value);
        self
    }

    /// Title from `_meta.title`, falling back to a top-level `title`.
    pub fn title(&self) -> Option<&str> {
        self.extra
            .get("_meta")
            .and_then(|m| m.get("title"))
            .or_else(|| self.extra.get("title"))
            .and_then(|t| t.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: IndexMap<NodeId, NodeDescriptor>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Parse any of the accepted template shapes: a bare API-format graph,
    /// one wrapped as `{"prompt": {...}}`, or an editor export with `nodes`.
    pub fn from_value(value: Value) -> AppResult<Self> {
        let value = match value {
            Value::Object(mut obj) if obj.get("prompt").map_or(false, Value::is_object) => {
                obj.remove("prompt").unwrap_or(Value::Null)
            }
            other => other,
        };
        if value.get("nodes").map_or(false, Value::is_array) {
            return ui_format::convert(&value);
        }
        let obj = match value {
            Value::Object(obj) => obj,
            _ => return Err(AppError::Parse("expected a JSON object of nodes".into())),
        };
        let mut graph = Graph::new();
        for (id, node) in obj {
            if !node.is_object() {
                return Err(AppError::Parse(format!("node '{}' is not an object", id)));
            }
            let descriptor: NodeDescriptor = serde_json::from_value(node)
                .map_err(|e| AppError::Parse(format!("node '{}': {}", id, e)))?;
            graph.insert(id, descriptor);
        }
        Ok(graph)
    }

    pub fn insert(&mut self, id: impl Into<NodeId>, node: NodeDescriptor) {
        self.nodes.insert(id.into(), node);
    }

    pub fn get(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut NodeDescriptor> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeDescriptor)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A named, immutable graph loaded from the workflows directory.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTemplate {
    name: String,
    graph: Graph,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub class_type: String,
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl GraphTemplate {
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        GraphTemplate {
            name: name.into(),
            graph,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.graph.contains(node_id)
    }

    /// Overridable node ids in template order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_ids().cloned().collect()
    }

    pub fn node_info(&self) -> IndexMap<NodeId, NodeInfo> {
        self.graph
            .iter()
            .map(|(id, node)| {
                let info = NodeInfo {
                    class_type: node.class_type.clone(),
                    inputs: node.inputs.keys().cloned().collect(),
                    title: node.title().map(str::to_string),
                };
                (id.clone(), info)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_format_keeps_order_and_extra_fields() {
        let value = json!({
            "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}, "_meta": {"title": "Save"}},
            "3": {"class_type": "KSampler", "inputs": {"seed": 1}}
        });
        let graph = Graph::from_value(value.clone()).unwrap();
        assert_eq!(graph.node_ids().collect::<Vec<_>>(), vec!["9", "3"]);
        assert_eq!(graph.get("9").unwrap().title(), Some("Save"));
        assert_eq!(graph.to_value(), value);
    }

    #[test]
    fn wrapped_prompt_is_unwrapped() {
        let graph = Graph::from_value(json!({
            "prompt": {"1": {"class_type": "CLIPTextEncode", "inputs": {"text": "a"}}}
        }))
        .unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get("1").unwrap().inputs["text"], "a");
    }

    #[test]
    fn node_without_class_type_is_a_parse_error() {
        let err = Graph::from_value(json!({"1": {"inputs": {}}})).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        assert!(err.to_string().contains("'1'"));

        let err = Graph::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn node_info_lists_inputs_and_titles() {
        let graph = Graph::from_value(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "x", "clip": ["4", 1]}, "_meta": {"title": "Positive"}}
        }))
        .unwrap();
        let template = GraphTemplate::new("basic", graph);
        let info = template.node_info();
        assert_eq!(info["6"].inputs, vec!["text", "clip"]);
        assert_eq!(info["6"].title.as_deref(), Some("Positive"));
        assert_eq!(template.node_ids(), vec!["6"]);
    }
}
