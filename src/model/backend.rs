//! Seam trait for the model backend.

use async_trait::async_trait;

use crate::error::OrchestratorError;

use super::transcript::{ChatMessage, EmbeddingTaskType, ModelResponse, ToolSchema};

/// A chat-completion backend with an embedding side channel.
///
/// Implementations must already have applied their own retry policy when a
/// call returns: the reasoning loop treats an error from `chat` as the retry
/// budget being exhausted and fails the task.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the accumulated transcript, optionally advertising tool schemas,
    /// and return either a final text or a round of tool-call requests.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        temperature: f64,
    ) -> Result<ModelResponse, OrchestratorError>;

    /// Embed `text` into the backend's fixed-dimension vector space.
    async fn embed(
        &self,
        text: &str,
        task_type: EmbeddingTaskType,
    ) -> Result<Vec<f32>, OrchestratorError>;
}
