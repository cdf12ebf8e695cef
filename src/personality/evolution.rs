//! Personality evolution: periodic trait analysis over recent history.
//!
//! The manager asks the model to act as a personality analyst over the
//! recent transcript and commits the resulting trait description as a new
//! append-only log entry. Runs are serialized so two analyses can never
//! interleave their read-analyze-append cycles; rollback and reset reuse
//! the same append-only mechanism in the store.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};
use crate::history::{TranscriptEntry, TranscriptStore};
use crate::model::{ChatMessage, ModelBackend, ModelResponse};

use super::store::PersonalityStore;
use super::EvolutionLog;

const ANALYST_PROMPT: &str = "You are a personality analyst for a conversational assistant. \
Review the assistant's current acquired traits and the recent conversation transcript, then \
write the updated trait description: tone, interests, speech habits, and durable knowledge \
about the people it talks to. Keep what still holds, revise what changed, and add what is \
new. Reply with the trait description only, no preamble and no headings.";

pub struct EvolutionManager {
    store: Arc<PersonalityStore>,
    history: TranscriptStore,
    backend: Arc<dyn ModelBackend>,
    events: Arc<EventBus>,
    window: usize,
    temperature: f64,
    run_lock: Mutex<()>,
}

impl EvolutionManager {
    pub fn new(
        store: Arc<PersonalityStore>,
        history: TranscriptStore,
        backend: Arc<dyn ModelBackend>,
        window: usize,
        temperature: f64,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            history,
            backend,
            events,
            window,
            temperature,
            run_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<PersonalityStore>,
        history: TranscriptStore,
        backend: Arc<dyn ModelBackend>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::new(
            store,
            history,
            backend,
            cfg.evolution_history_window,
            cfg.evolution_temperature,
            events,
        )
    }

    /// Analyze recent history and append a new trait entry for the active
    /// personality. Concurrent calls queue up behind each other.
    pub async fn evolve(&self, reason: &str) -> Result<EvolutionLog, OrchestratorError> {
        let _guard = self.run_lock.lock().await;

        let snapshot = self.store.asnapshot().await?;
        let entries = self.history.arecent_all(self.window).await?;
        if entries.is_empty() {
            return Err(OrchestratorError::validation(
                "no conversation history to analyze",
            ));
        }

        let messages = vec![
            ChatMessage::system(ANALYST_PROMPT),
            ChatMessage::user(analysis_request(
                snapshot.effective_traits(),
                &entries,
                reason,
            )),
        ];
        let traits = match self.backend.chat(&messages, &[], self.temperature).await? {
            ModelResponse::Text(text) => text.trim().to_string(),
            ModelResponse::ToolCalls(_) => {
                return Err(OrchestratorError::validation(
                    "analysis model answered with tool calls instead of text",
                ));
            }
        };
        if traits.is_empty() {
            return Err(OrchestratorError::validation(
                "analysis model returned an empty trait description",
            ));
        }

        let log = self
            .store
            .aappend_log(&snapshot.personality_id, &traits, reason)
            .await?;
        log::info!(
            "evolution committed log {} for personality {}",
            log.id,
            log.personality_id
        );
        self.events.emit(EventKind::EvolutionCommitted {
            personality_id: log.personality_id.clone(),
            log_id: log.id.clone(),
            reason: reason.to_string(),
        });
        Ok(log)
    }
}

impl std::fmt::Debug for EvolutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionManager")
            .field("window", &self.window)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

fn analysis_request(
    current_traits: Option<&str>,
    entries: &[TranscriptEntry],
    reason: &str,
) -> String {
    let mut request = String::from("Current traits:\n");
    request.push_str(current_traits.unwrap_or("(none yet)"));
    request.push_str("\n\nRecent conversation:\n");
    for entry in entries {
        request.push_str(&format!("{}: {}\n", entry.role, entry.content));
    }
    request.push_str("\nReason for this update: ");
    request.push_str(reason);
    request
}

/// Run [`EvolutionManager::evolve`] on a fixed interval. Failures (for
/// example an empty transcript) are logged and the schedule keeps going.
pub fn spawn_scheduler(manager: Arc<EvolutionManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first
        // analysis happens a full interval after startup.
        ticker.tick().await;
        log::info!("evolution scheduler running every {interval:?}");
        loop {
            ticker.tick().await;
            match manager.evolve("Scheduled evolution").await {
                Ok(log) => log::debug!("scheduled evolution appended log {}", log.id),
                Err(err) => log::warn!("scheduled evolution skipped: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use crate::history::{ROLE_ASSISTANT, ROLE_USER};
    use crate::model::{EmbeddingTaskType, ToolCallRequest, ToolSchema};

    struct ScriptedBackend {
        responses: StdMutex<VecDeque<ModelResponse>>,
        requests: StdMutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<ModelResponse>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                requests: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _temperature: f64,
        ) -> Result<ModelResponse, OrchestratorError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| OrchestratorError::transient("script exhausted"))
        }

        async fn embed(
            &self,
            _text: &str,
            _task_type: EmbeddingTaskType,
        ) -> Result<Vec<f32>, OrchestratorError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        store: Arc<PersonalityStore>,
        history: TranscriptStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(PersonalityStore::new(dir.path().join("p.db")).unwrap());
        let history = TranscriptStore::new(dir.path().join("t.db")).unwrap();
        Fixture {
            store,
            history,
            _dir: dir,
        }
    }

    fn manager(f: &Fixture, backend: Arc<dyn ModelBackend>) -> EvolutionManager {
        EvolutionManager::new(
            Arc::clone(&f.store),
            f.history.clone(),
            backend,
            50,
            0.7,
            Arc::new(EventBus::new()),
        )
    }

    #[tokio::test]
    async fn test_evolve_appends_traits_from_analysis() {
        let f = fixture();
        let p = f.store.create("Ada", "You are Ada.").unwrap();
        f.store.append_log(&p.id, "Curious.", "seed").unwrap();
        f.history
            .record("conv-1", ROLE_USER, "tell me about Saturn's rings")
            .unwrap();
        f.history
            .record("conv-1", ROLE_ASSISTANT, "Gladly! They are mostly ice.")
            .unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![ModelResponse::Text(
            "Curious, enthusiastic about astronomy.".to_string(),
        )]));
        let mgr = manager(&f, Arc::clone(&backend) as Arc<dyn ModelBackend>);

        let log = mgr.evolve("Post-conversation analysis").await.unwrap();
        assert_eq!(log.personality_id, p.id);
        assert_eq!(log.traits, "Curious, enthusiastic about astronomy.");
        assert_eq!(log.reason, "Post-conversation analysis");

        // The new entry is what subsequent context assembly sees.
        let snapshot = f.store.snapshot().unwrap();
        assert_eq!(
            snapshot.effective_traits(),
            Some("Curious, enthusiastic about astronomy.")
        );
        let history = f.store.history(&p.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, log.id, "newest entry first");

        // The analysis request carried both prior traits and transcript.
        let requests = backend.requests.lock().unwrap();
        let user_msg = requests[0][1].content.clone().unwrap();
        assert!(user_msg.contains("Curious."));
        assert!(user_msg.contains("Saturn's rings"));
        assert!(user_msg.contains("Post-conversation analysis"));
    }

    #[tokio::test]
    async fn test_empty_history_refuses_to_evolve() {
        let f = fixture();
        f.store.create("Ada", "You are Ada.").unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![ModelResponse::Text(
            "unused".to_string(),
        )]));
        let mgr = manager(&f, backend);

        let err = mgr.evolve("Manual").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
        assert!(f.store.latest_log(&f.store.active().unwrap().unwrap().id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_no_active_personality_is_an_error() {
        let f = fixture();
        f.history.record("conv-1", ROLE_USER, "hi").unwrap();
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let mgr = manager(&f, backend);

        let err = mgr.evolve("Manual").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_tool_call_answer_is_rejected() {
        let f = fixture();
        let p = f.store.create("Ada", "You are Ada.").unwrap();
        f.history.record("conv-1", ROLE_USER, "hi").unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![ModelResponse::ToolCalls(vec![
            ToolCallRequest {
                id: "c1".to_string(),
                name: "weather".to_string(),
                arguments: serde_json::json!({}),
            },
        ])]));
        let mgr = manager(&f, backend);

        let err = mgr.evolve("Manual").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
        assert!(f.store.latest_log(&p.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_evolutions_serialize() {
        let f = fixture();
        f.store.create("Ada", "You are Ada.").unwrap();
        f.history.record("conv-1", ROLE_USER, "hi").unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![
            ModelResponse::Text("First pass.".to_string()),
            ModelResponse::Text("Second pass.".to_string()),
        ]));
        let mgr = Arc::new(manager(&f, backend));

        let (a, b) = tokio::join!(
            {
                let mgr = Arc::clone(&mgr);
                async move { mgr.evolve("one").await }
            },
            {
                let mgr = Arc::clone(&mgr);
                async move { mgr.evolve("two").await }
            }
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        let p = f.store.active().unwrap().unwrap();
        assert_eq!(f.store.history(&p.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_evolution_emits_commit_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let f = fixture();
        f.store.create("Ada", "You are Ada.").unwrap();
        f.history.record("conv-1", ROLE_USER, "hello").unwrap();

        let events = Arc::new(EventBus::new());
        let committed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&committed);
        events.subscribe(move |event| {
            if matches!(event.kind, EventKind::EvolutionCommitted { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let backend = Arc::new(ScriptedBackend::new(vec![ModelResponse::Text(
            "Warm.".to_string(),
        )]));
        let mgr = EvolutionManager::new(
            Arc::clone(&f.store),
            f.history.clone(),
            backend,
            50,
            0.7,
            events,
        );
        mgr.evolve("Manual").await.unwrap();
        assert_eq!(committed.load(Ordering::SeqCst), 1);
    }
}
