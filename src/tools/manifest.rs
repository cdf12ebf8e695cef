//! Tool manifests and argument validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::model::ToolSchema;

/// Self-description served by a tool at `GET /manifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    #[serde(default = "empty_object", alias = "parameters_schema")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A manifest paired with the endpoint it was discovered at.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub manifest: ToolManifest,
    pub endpoint: String,
}

impl DiscoveredTool {
    /// Schema advertised to the model alongside the transcript.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.manifest.name.clone(),
            description: self.manifest.description.clone(),
            parameters: self.manifest.parameters.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

/// Check `args` against a tool's parameter schema before any network call.
///
/// Covers the object shape, `required` keys, and primitive `type` tags for
/// declared properties. Keys the schema does not mention pass through
/// untouched; the downstream tool decides what to do with them.
pub fn validate_arguments(
    tool_name: &str,
    schema: &Value,
    args: &Value,
) -> Result<(), OrchestratorError> {
    let Some(args_map) = args.as_object() else {
        return Err(OrchestratorError::validation(format!(
            "arguments for tool '{tool_name}' must be a JSON object, got {}",
            type_name(args)
        )));
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !args_map.contains_key(key) {
                return Err(OrchestratorError::validation(format!(
                    "tool '{tool_name}' requires argument '{key}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in args_map {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(OrchestratorError::validation(format!(
                    "tool '{tool_name}' argument '{key}' must be {expected}, got {}",
                    type_name(value)
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
