//! Named generation parameters and the per-template table that routes them
//! to node fields.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::prompt::overrides::NodeOverrides;
use crate::workflow::graph::NodeId;

pub const DEFAULT_POSITIVE_PROMPT: &str = "A beautiful woman walking towards the camera";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "色调艳丽，过曝，静态，细节模糊不清，字幕，风格，作品，画作，画面，静止，整体发灰，最差质量，低质量，JPEG压缩残留，丑陋的，残缺的，多余的手指，画得不好的手部，画得不好的脸部，畸形的，毁容的，形态畸形的肢体，手指融合，静止不动的画面，杂乱的背景，三条腿，背景人很多，倒着走";

/// Human-facing parameters of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub cfg_img: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub lora_strength: f64,
    pub frame_rate: u32,
    pub interpolation_multiplier: u32,
    pub final_frame_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        GenerateParams {
            image: None,
            positive_prompt: DEFAULT_POSITIVE_PROMPT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            width: 720,
            height: 1280,
            num_frames: 81,
            steps: 5,
            cfg_scale: 1.0,
            cfg_img: 8.0,
            seed: None,
            lora_strength: 0.7,
            frame_rate: 16,
            interpolation_multiplier: 5,
            final_frame_rate: 60,
            model_name: None,
        }
    }
}

impl GenerateParams {
    /// Parse from a loose JSON object, filling defaults, then validate.
    pub fn from_map(map: Map<String, Value>) -> AppResult<Self> {
        let params: GenerateParams = serde_json::from_value(Value::Object(map))
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        params.validated()
    }

    /// Dimensions must be multiples of 8; an even frame count is bumped to odd.
    pub fn validated(mut self) -> AppResult<Self> {
        if self.width == 0 || self.height == 0 || self.width % 8 != 0 || self.height % 8 != 0 {
            return Err(AppError::InvalidInput(
                "width and height must be non-zero multiples of 8".into(),
            ));
        }
        if self.num_frames == 0 {
            return Err(AppError::InvalidInput("num_frames must be positive".into()));
        }
        if self.num_frames % 2 == 0 {
            self.num_frames += 1;
        }
        if self.final_frame_rate == 0 {
            return Err(AppError::InvalidInput("final_frame_rate must be positive".into()));
        }
        Ok(self)
    }

    /// Output duration in seconds at the final frame rate.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames as f64 / self.final_frame_rate as f64
    }

    /// Parameter name -> value, with `image` replaced by the staged file name.
    /// Unset optional parameters are omitted so template defaults survive.
    pub fn named_values(&self, image_name: Option<&str>) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("image");
        if let Some(name) = image_name {
            map.insert("image".into(), Value::String(name.to_string()));
        }
        if self.seed.is_some() {
            map.insert("seed_control".into(), Value::String("fixed".into()));
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamTarget {
    pub node: NodeId,
    pub field: String,
}

/// Static routing of parameter names to node fields for one template.
/// Loaded from the template's `.params.json` sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTable(IndexMap<String, ParamTarget>);

impl ParameterTable {
    pub fn insert(&mut self, param: impl Into<String>, node: impl Into<NodeId>, field: impl Into<String>) {
        self.0.insert(
            param.into(),
            ParamTarget {
                node: node.into(),
                field: field.into(),
            },
        );
    }

    pub fn target(&self, param: &str) -> Option<&ParamTarget> {
        self.0.get(param)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overrides for every value whose name the table routes; others are skipped.
    pub fn overrides(&self, values: &Map<String, Value>) -> NodeOverrides {
        let mut out = NodeOverrides::new();
        for (name, value) in values {
            match self.0.get(name) {
                Some(target) => out.set(target.node.clone(), target.field.clone(), value.clone()),
                None => tracing::debug!(param = %name, "parameter not routed by this template"),
            }
        }
        out
    }
}
