//! Fallback parsing for tool calls the model writes into its text reply.
//!
//! Most backends use the native `tool_calls` field, but some models emit a
//! JSON object in the message body instead, often inside a markdown fence.
//! This parser recognizes that shape so those calls still execute.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::model::ToolCallRequest;

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Try to read `text` as a single tool call.
///
/// Accepts `{"tool": ..., "args": {...}}` with `tool_name`/`arguments` as
/// aliases, bare or inside a code fence. Anything else returns `None` and
/// the text stands as the final reply.
pub fn extract_tool_call(text: &str) -> Option<ToolCallRequest> {
    let candidate = CODE_FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    let parsed: Value = serde_json::from_str(candidate).ok()?;
    let object = parsed.as_object()?;

    let name = object
        .get("tool")
        .or_else(|| object.get("tool_name"))?
        .as_str()?
        .to_string();
    let arguments = object
        .get("args")
        .or_else(|| object.get("arguments"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    Some(ToolCallRequest {
        id: format!("call-{}", Uuid::new_v4()),
        name,
        arguments,
    })
}
