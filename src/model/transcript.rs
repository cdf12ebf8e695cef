//! Transcript message types exchanged with the model backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One message of the accumulated transcript sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Text content; absent on assistant messages that only carry tool calls.
    pub content: Option<String>,
    /// Tool calls requested by an assistant message.
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For tool observations, the id of the originating call.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant message that requests tool calls instead of text.
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// A tool observation paired with its originating call id.
    pub fn tool_observation(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A structured tool-call request extracted from a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call id used to pair the eventual observation with this request.
    pub id: String,
    /// Tool name; resolved against the registry, never a compiled-in list.
    pub name: String,
    /// Structured arguments as supplied by the model.
    pub arguments: Value,
}

/// What the backend answered: a final text or a round of tool calls.
#[derive(Debug, Clone)]
pub enum ModelResponse {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// Function-call schema advertised to the backend for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the tool's parameters.
    pub parameters: Value,
}

/// Hint forwarded with embedding requests so the backend can pick the
/// appropriate task-specific representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTaskType {
    /// Embedding a document that will be stored for later retrieval.
    RetrievalDocument,
    /// Embedding a query used to search stored documents.
    RetrievalQuery,
}

impl EmbeddingTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingTaskType::RetrievalDocument => "retrieval_document",
            EmbeddingTaskType::RetrievalQuery => "retrieval_query",
        }
    }
}
