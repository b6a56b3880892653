use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::prompt::NodeOverrides;

/// Build overrides from `NODE.FIELD=VALUE` pairs (`NODE.inputs.FIELD=VALUE`
/// is accepted too). Later pairs win.
pub fn parse_set_pairs(items: &[String]) -> AppResult<NodeOverrides> {
    let mut out = NodeOverrides::new();
    for s in items {
        let Some((key, val)) = s.split_once('=') else {
            return Err(AppError::InvalidInput(format!(
                "invalid --set '{}', expected NODE.FIELD=VALUE",
                s
            )));
        };
        let path: Vec<&str> = key.split('.').collect();
        let (node, field) = match path.as_slice() {
            [node, field] => (*node, *field),
            [node, "inputs", field] => (*node, *field),
            _ => {
                return Err(AppError::InvalidInput(format!(
                    "invalid --set key '{}', expected NODE.FIELD",
                    key
                )))
            }
        };
        if node.is_empty() || field.is_empty() {
            return Err(AppError::InvalidInput(format!("invalid --set key '{}'", key)));
        }
        out.set(node, field, parse_value(val));
    }
    Ok(out)
}

/// JSON when it parses, then case-insensitive `null`/`true`/`false`, then
/// numbers, then the raw text.
pub fn parse_value(src: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(src) {
        return value;
    }
    match src.to_ascii_lowercase().as_str() {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => src
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| src.parse::<f64>().map(|f| json!(f)))
            .unwrap_or_else(|_| Value::String(src.to_string())),
    }
}
