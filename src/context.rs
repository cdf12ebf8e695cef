//! Prompt context assembly.
//!
//! Before every reasoning loop the assembler gathers three ingredients:
//! the active personality (base prompt plus latest acquired traits), facts
//! retrieved from long-term memory for the incoming message, and the recent
//! turns of the conversation transcript. A missing memory service degrades
//! gracefully to an empty fact list; a missing active personality is fatal
//! because there is no prompt to speak with.

use std::sync::Arc;

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};
use crate::history::{TranscriptEntry, TranscriptStore, ROLE_ASSISTANT, ROLE_USER};
use crate::intake::Task;
use crate::memory::{MemoryClient, RetrievedFact};
use crate::model::ChatMessage;
use crate::personality::{PersonaSnapshot, PersonalityStore};

/// Everything the reasoning loop needs to open a model conversation.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub snapshot: PersonaSnapshot,
    pub facts: Vec<RetrievedFact>,
    pub recent: Vec<TranscriptEntry>,
    pub system_prompt: String,
    /// True when memory lookup failed and the bundle was built without facts.
    pub degraded: bool,
}

impl ContextBundle {
    /// Render the bundle as the opening transcript for the model:
    /// system prompt, recent turns, then the message being answered.
    pub fn messages(&self, latest_message: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.recent.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        for entry in &self.recent {
            match entry.role.as_str() {
                ROLE_USER => messages.push(ChatMessage::user(&entry.content)),
                ROLE_ASSISTANT => messages.push(ChatMessage::assistant(&entry.content)),
                other => log::debug!("skipping transcript entry with role '{other}'"),
            }
        }
        messages.push(ChatMessage::user(latest_message));
        messages
    }
}

/// Builds [`ContextBundle`]s from the stores and the memory service.
pub struct ContextAssembler {
    store: Arc<PersonalityStore>,
    memory: MemoryClient,
    history: TranscriptStore,
    history_window: usize,
    events: Arc<EventBus>,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<PersonalityStore>,
        memory: MemoryClient,
        history: TranscriptStore,
        history_window: usize,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            memory,
            history,
            history_window,
            events,
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<PersonalityStore>,
        memory: MemoryClient,
        history: TranscriptStore,
        events: Arc<EventBus>,
    ) -> Self {
        Self::new(store, memory, history, cfg.history_window, events)
    }

    /// Assemble the context for one incoming task.
    ///
    /// Fails only when no personality is active or the store is unreadable.
    /// Memory trouble is reported on the event bus and the bundle marked
    /// degraded; transcript trouble is logged and the window left empty.
    pub async fn build(&self, task: &Task) -> Result<ContextBundle, OrchestratorError> {
        let snapshot = self.store.asnapshot().await?;

        let mut degraded = false;
        let facts = if self.memory.available() {
            match self.memory.search(&task.message_text).await {
                Ok(facts) => facts,
                Err(err) => {
                    log::warn!(
                        "memory lookup failed for conversation {}: {err}",
                        task.conversation_id
                    );
                    self.events.emit(EventKind::MemoryDegraded {
                        conversation_id: task.conversation_id.clone(),
                        error: err.to_string(),
                    });
                    degraded = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let recent = match self
            .history
            .arecent(&task.conversation_id, self.history_window)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!(
                    "transcript lookup failed for conversation {}: {err}",
                    task.conversation_id
                );
                Vec::new()
            }
        };

        let system_prompt = render_system_prompt(&snapshot, &facts);
        Ok(ContextBundle {
            snapshot,
            facts,
            recent,
            system_prompt,
            degraded,
        })
    }
}

fn render_system_prompt(snapshot: &PersonaSnapshot, facts: &[RetrievedFact]) -> String {
    let mut prompt = snapshot.base_prompt.clone();
    if let Some(traits) = snapshot.effective_traits() {
        prompt.push_str("\n\nAcquired traits:\n");
        prompt.push_str(traits);
    }
    if !facts.is_empty() {
        prompt.push_str("\n\nLong-term memory about this user:\n");
        for fact in facts {
            prompt.push_str("- ");
            prompt.push_str(&fact.text);
            prompt.push('\n');
        }
    }
    prompt
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("history_window", &self.history_window)
            .finish_non_exhaustive()
    }
}
