//! Sparse node overrides and their merge onto a template.
//!
//! A patch is a JSON object per node id. Reserved keys:
//! - `inputs`: object merged key-wise into the node's inputs
//! - `widgets_values`: array replaces the widget list, object merges key-wise;
//!   widget-derived inputs are then recomputed
//! - `class_type`, `_meta`: replace the node's value
//!
//! Every other key is an input field and replaces `inputs[key]`.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::workflow::graph::{Graph, GraphTemplate, NodeDescriptor, NodeId};
use crate::workflow::ui_format::widget_inputs;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOverrides(IndexMap<NodeId, Map<String, Value>>);

impl NodeOverrides {
    pub fn new() -> Self {
        NodeOverrides::default()
    }

    /// Set one field of one node, replacing any previous value for it.
    pub fn set(&mut self, node_id: impl Into<NodeId>, field: impl Into<String>, value: Value) {
        self.0.entry(node_id.into()).or_default().insert(field.into(), value);
    }

    /// Fold `other` into `self`; fields in `other` win.
    pub fn extend(&mut self, other: NodeOverrides) {
        for (node_id, patch) in other.0 {
            let entry = self.0.entry(node_id).or_default();
            for (k, v) in patch {
                entry.insert(k, v);
            }
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.0.get(node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Map<String, Value>)> {
        self.0.iter()
    }
}

/// Check every override against the template without touching anything.
pub fn validate(template: &GraphTemplate, overrides: &NodeOverrides) -> AppResult<()> {
    for (node_id, patch) in overrides.iter() {
        if !template.contains(node_id) {
            return Err(AppError::UnknownNode(node_id.clone()));
        }
        if let Some(inputs) = patch.get("inputs") {
            if !inputs.is_object() {
                return Err(AppError::InvalidInput(format!(
                    "node '{}': 'inputs' must be an object",
                    node_id
                )));
            }
        }
        if let Some(class_type) = patch.get("class_type") {
            if !class_type.is_string() {
                return Err(AppError::InvalidInput(format!(
                    "node '{}': 'class_type' must be a string",
                    node_id
                )));
            }
        }
        if let Some(widgets) = patch.get("widgets_values") {
            if !(widgets.is_array() || widgets.is_object()) {
                return Err(AppError::InvalidInput(format!(
                    "node '{}': 'widgets_values' must be an array or object",
                    node_id
                )));
            }
        }
    }
    Ok(())
}

/// Produce a submittable graph: the template with `overrides` merged in.
///
/// Either every override applies or the call fails and nothing is produced.
/// The stored template is never mutated.
pub fn apply(template: &GraphTemplate, overrides: &NodeOverrides) -> AppResult<Graph> {
    validate(template, overrides)?;
    let mut graph = template.graph().clone();
    for (node_id, patch) in overrides.iter() {
        if let Some(node) = graph.get_mut(node_id) {
            merge_patch(node, patch);
        }
    }
    Ok(graph)
}

fn merge_patch(node: &mut NodeDescriptor, patch: &Map<String, Value>) {
    if let Some(Value::String(class_type)) = patch.get("class_type") {
        node.class_type = class_type.clone();
    }
    if let Some(meta) = patch.get("_meta") {
        node.extra.insert("_meta".into(), meta.clone());
    }
    if let Some(widgets) = patch.get("widgets_values") {
        let merged = match (node.extra.get("widgets_values"), widgets) {
            (Some(Value::Object(current)), Value::Object(update)) => {
                let mut current = current.clone();
                for (k, v) in update {
                    current.insert(k.clone(), v.clone());
                }
                Value::Object(current)
            }
            _ => widgets.clone(),
        };
        for (key, value) in widget_inputs(&node.class_type, &merged) {
            node.inputs.insert(key, value);
        }
        node.extra.insert("widgets_values".into(), merged);
    }
    if let Some(Value::Object(inputs)) = patch.get("inputs") {
        for (k, v) in inputs {
            node.inputs.insert(k.clone(), v.clone());
        }
    }
    for (key, value) in patch {
        if matches!(key.as_str(), "inputs" | "widgets_values" | "class_type" | "_meta") {
            continue;
        }
        node.inputs.insert(key.clone(), value.clone());
    }
}
