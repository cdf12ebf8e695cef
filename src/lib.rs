//! # colloquy
//!
//! A conversational orchestration engine. Given an inbound chat task it
//! assembles context (active personality and its evolved traits, long-term
//! memory facts, recent transcript), drives a bounded reasoning loop against
//! an OpenAI-compatible model backend that may request tool execution,
//! dispatches those calls to manifest-discovered tool services, and publishes
//! the final reply to an outbound webhook. A separate evolution process
//! periodically rewrites the active personality's acquired traits from recent
//! conversation history, with append-only versioning and rollback.
//!
//! The crate is a library plus one `server` binary that wires the components
//! together behind an axum HTTP surface (task intake + administration).

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod intake;
pub mod memory;
pub mod model;
pub mod outbox;
pub mod personality;
pub mod reasoning;
pub mod server;
pub mod tools;

pub use config::Config;
pub use context::{ContextAssembler, ContextBundle};
pub use error::OrchestratorError;
pub use events::{EventBus, EventKind, OrchestratorEvent};
pub use history::TranscriptStore;
pub use intake::{Task, TaskPipeline, TaskQueue};
pub use memory::MemoryClient;
pub use model::{HttpModelBackend, ModelBackend};
pub use outbox::{HttpOutbox, OutboundReply, ReplySink};
pub use personality::{EvolutionLog, EvolutionManager, Personality, PersonalityStore};
pub use reasoning::ReasoningLoop;
pub use tools::{ToolInvoker, ToolRegistry};

/// Crate version, reported by `GET /health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
