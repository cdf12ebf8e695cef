//! Model backend surface: chat completions and embeddings.
//!
//! The reasoning loop and the evolution manager talk to the backend through
//! the [`ModelBackend`] trait so tests can substitute scripted fakes;
//! [`HttpModelBackend`] is the production implementation against an
//! OpenAI-compatible gateway.

pub mod backend;
pub mod client;
pub mod transcript;

pub use backend::ModelBackend;
pub use client::HttpModelBackend;
pub use transcript::{
    ChatMessage, EmbeddingTaskType, ModelResponse, Role, ToolCallRequest, ToolSchema,
};
