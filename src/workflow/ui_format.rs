//! Conversion from editor exports (`{"nodes": [...], "links": [...]}`) to the
//! engine's API format.
//!
//! Linked inputs become `[source_id, slot]` pairs. Positional widget values are
//! named with a per-class table; unknown classes get `input_<i>` names. The
//! original `widgets_values` and `title` stay in the node's extra bag so that
//! widget overrides can be re-derived later.
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::workflow::graph::{Graph, NodeDescriptor};

const UI_ONLY_CLASSES: &[&str] = &["note", "markdownnote", "markdown note", "reroute", "primitivenode"];

fn widget_names(class_type: &str) -> Option<&'static [&'static str]> {
    let names: &'static [&'static str] = match class_type {
        "LoadImage" => &["image", "upload"],
        "Text Prompt (JPS)" => &["text"],
        "CLIPTextEncode" => &["text"],
        "SaveImage" => &["filename_prefix"],
        "CheckpointLoaderSimple" => &["ckpt_name"],
        "VAELoader" => &["vae_name"],
        "EmptyLatentImage" => &["width", "height", "batch_size"],
        "KSampler" => &["seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise"],
        "WanVideoModelLoader" => &["model_name", "precision", "dtype", "device", "attention_mode"],
        "WanVideoSampler" => &[
            "steps",
            "cfg",
            "cfg_img",
            "seed",
            "seed_control",
            "denoise",
            "sampler_name",
            "sampler_idx",
            "scheduler_idx",
            "custom_sigmas",
            "scheduler",
        ],
        "WanVideoTextEncode" => &["positive_prompt", "negative_prompt", "enable_text_encoder_offload"],
        "WanVideoImageClipEncode" => &[
            "width",
            "height",
            "num_frames",
            "enable_tiling",
            "tile_overlap_factor",
            "tile_frames_factor",
            "tile_batch_factor",
            "enable_vae_offload",
        ],
        "WanVideoLoraSelect" => &["lora", "strength"],
        "RIFE VFI" => &["ckpt_name", "multiplier"],
        _ => return None,
    };
    Some(names)
}

/// Name the widget values of a node of `class_type`.
///
/// Object-shaped widget bags map key-wise (nested objects and nulls skipped);
/// arrays use the class table or `input_<i>` for unknown classes.
pub fn widget_inputs(class_type: &str, widgets: &Value) -> Vec<(String, Value)> {
    match widgets {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null() && !v.is_object())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Array(values) => match widget_names(class_type) {
            Some(names) => names
                .iter()
                .zip(values.iter())
                .filter(|(_, v)| !v.is_null())
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect(),
            None => values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (format!("input_{}", i), v.clone()))
                .collect(),
        },
        _ => Vec::new(),
    }
}

fn is_ui_only(class_type: &str, node: &Value) -> bool {
    let lower = class_type.trim().to_ascii_lowercase();
    if UI_ONLY_CLASSES.contains(&lower.as_str()) {
        return true;
    }
    node.get("_meta")
        .and_then(|m| m.get("ui_only"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Link id -> (source node id, output slot), from the top-level `links` table
/// (`[id, src, slot, dst, dst_slot, type]`) or, failing that, from node outputs.
fn link_sources(workflow: &Value, nodes: &[Value]) -> HashMap<i64, (String, i64)> {
    let mut map = HashMap::new();
    if let Some(links) = workflow.get("links").and_then(Value::as_array) {
        for link in links.iter().filter_map(Value::as_array) {
            if let (Some(id), Some(src), Some(slot)) = (
                link.first().and_then(Value::as_i64),
                link.get(1).and_then(id_string),
                link.get(2).and_then(Value::as_i64),
            ) {
                map.insert(id, (src, slot));
            }
        }
    }
    for node in nodes {
        let Some(src) = node.get("id").and_then(id_string) else { continue };
        let outputs = node.get("outputs").and_then(Value::as_array);
        for (slot, output) in outputs.into_iter().flatten().enumerate() {
            let links = output.get("links").and_then(Value::as_array);
            for link_id in links.into_iter().flatten().filter_map(Value::as_i64) {
                map.entry(link_id).or_insert_with(|| (src.clone(), slot as i64));
            }
        }
    }
    map
}

pub fn convert(workflow: &Value) -> AppResult<Graph> {
    let nodes = workflow
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Parse("editor workflow has no 'nodes' array".into()))?;
    let links = link_sources(workflow, nodes);

    let mut graph = Graph::new();
    for node in nodes {
        let id = node
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| AppError::Parse("editor node without an id".into()))?;
        let class_type = node
            .get("type")
            .or_else(|| node.get("class_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Parse(format!("node '{}' has no type", id)))?;
        if is_ui_only(class_type, node) {
            continue;
        }

        let mut descriptor = NodeDescriptor::new(class_type);
        if let Some(widgets) = node.get("widgets_values") {
            for (key, value) in widget_inputs(class_type, widgets) {
                descriptor.inputs.insert(key, value);
            }
            descriptor.extra.insert("widgets_values".into(), widgets.clone());
        }
        for input in node.get("inputs").and_then(Value::as_array).into_iter().flatten() {
            let Some(name) = input.get("name").and_then(Value::as_str) else { continue };
            if let Some(link_id) = input.get("link").and_then(Value::as_i64) {
                if let Some((src, slot)) = links.get(&link_id) {
                    descriptor
                        .inputs
                        .insert(name.to_string(), Value::Array(vec![Value::String(src.clone()), Value::from(*slot)]));
                }
            }
        }
        if let Some(title) = node.get("title").and_then(Value::as_str) {
            let mut meta = Map::new();
            meta.insert("title".into(), Value::String(title.to_string()));
            descriptor.extra.insert("_meta".into(), Value::Object(meta));
        }
        graph.insert(id, descriptor);
    }
    Ok(graph)
}
