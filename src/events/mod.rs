//! In-process orchestration events.
//!
//! Components publish typed lifecycle events (task started/completed, tool
//! usage, memory degradation, evolution commits) to an [`EventBus`] so
//! operators and tests can observe the engine without threading callbacks
//! through every call path. Handlers run synchronously on the emitting task;
//! they are expected to be cheap (log, counter bump, channel send).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// What happened, with the payload that identifies where.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A worker picked up a task from its conversation's shard.
    TaskStarted {
        conversation_id: String,
        correlation_id: String,
    },
    /// A task produced and published a final reply.
    TaskCompleted {
        conversation_id: String,
        correlation_id: String,
        rounds: u32,
    },
    /// A task failed fatally; a degraded reply was attempted.
    TaskFailed {
        conversation_id: String,
        correlation_id: String,
        error: String,
    },
    /// A task was cancelled mid-flight; nothing was published.
    TaskCancelled {
        conversation_id: String,
        correlation_id: String,
    },
    /// The memory collaborator failed; the task proceeded without facts.
    MemoryDegraded {
        conversation_id: String,
        error: String,
    },
    /// A manifest discovery pass completed.
    ToolsDiscovered { count: usize },
    /// A tool invocation is about to go over the wire.
    ToolCallStarted { tool_name: String },
    /// A tool invocation returned successfully.
    ToolCallFinished { tool_name: String },
    /// A tool invocation failed (validation, network, or tool-reported).
    ToolCallFailed { tool_name: String, error: String },
    /// A reply was handed to the outbound channel.
    ReplyPublished {
        conversation_id: String,
        correlation_id: String,
    },
    /// The outbound channel rejected a reply; not retried.
    PublishFailed {
        conversation_id: String,
        error: String,
    },
    /// A new evolution log entry was committed.
    EvolutionCommitted {
        personality_id: String,
        log_id: String,
        reason: String,
    },
    /// The active personality changed.
    PersonalityActivated { personality_id: String },
}

/// An emitted event: envelope plus [`EventKind`] payload.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorEvent {
    /// Unique event identifier (UUID v4).
    pub event_id: String,
    /// UTC timestamp of emission.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OrchestratorEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

/// Synchronous fan-out bus for [`OrchestratorEvent`]s.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<HandlerId, Handler>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns an id for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&OrchestratorEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().insert(id, Arc::new(handler));
        id
    }

    /// Remove a handler. Removing an unknown id is a no-op.
    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.write().remove(&id);
    }

    /// Emit an event to every registered handler, in registration-id order.
    pub fn emit(&self, kind: EventKind) {
        let event = OrchestratorEvent::new(kind);
        log::debug!("event {:?}", event.kind);

        // Handlers are cloned out so user code never runs under the lock.
        let handlers: Vec<Handler> = {
            let guard = self.handlers.read();
            let mut entries: Vec<_> = guard.iter().collect();
            entries.sort_by_key(|(id, _)| id.0);
            entries.into_iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
