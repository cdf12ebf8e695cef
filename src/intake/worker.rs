//! Worker pool: drains the queue shards through the full pipeline.
//!
//! Each worker owns one shard and processes its tasks strictly in order,
//! which together with conversation pinning serializes loops per
//! conversation. Fatal failures still produce a best-effort degraded reply
//! so the user is never left waiting on silence; cancellation publishes
//! nothing.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::context::ContextAssembler;
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};
use crate::history::{TranscriptStore, ROLE_ASSISTANT, ROLE_USER};
use crate::outbox::{OutboundReply, ReplySink};
use crate::reasoning::{LoopResult, LoopState, ReasoningLoop};

use super::{Task, TaskQueue};

/// Everything a worker needs to take a task from queue to reply.
pub struct TaskPipeline {
    assembler: Arc<ContextAssembler>,
    reasoning: Arc<ReasoningLoop>,
    outbox: Arc<dyn ReplySink>,
    history: TranscriptStore,
    events: Arc<EventBus>,
    degraded_reply: String,
}

impl TaskPipeline {
    pub fn new(
        assembler: Arc<ContextAssembler>,
        reasoning: Arc<ReasoningLoop>,
        outbox: Arc<dyn ReplySink>,
        history: TranscriptStore,
        events: Arc<EventBus>,
        degraded_reply: String,
    ) -> Self {
        Self {
            assembler,
            reasoning,
            outbox,
            history,
            events,
            degraded_reply,
        }
    }

    /// Process one task end to end.
    pub async fn process(&self, queue: &TaskQueue, task: Task) {
        let cancel = queue.register_cancel(&task.conversation_id);

        self.events.emit(EventKind::TaskStarted {
            conversation_id: task.conversation_id.clone(),
            correlation_id: task.correlation_id.clone(),
        });

        match self.assembler.build(&task).await {
            Ok(bundle) => {
                // Recorded after assembly so the history window holds only
                // prior turns; the incoming message is appended separately.
                self.record(&task.conversation_id, ROLE_USER, &task.message_text)
                    .await;
                match self.reasoning.run(&task, &bundle, &cancel).await {
                    LoopResult::Cancelled => {
                        self.events.emit(EventKind::TaskCancelled {
                            conversation_id: task.conversation_id.clone(),
                            correlation_id: task.correlation_id.clone(),
                        });
                    }
                    LoopResult::Finished(outcome) => match outcome.state {
                        LoopState::Done => {
                            let reply = outcome
                                .reply
                                .unwrap_or_else(|| self.degraded_reply.clone());
                            self.deliver(&task, &reply).await;
                            self.record(&task.conversation_id, ROLE_ASSISTANT, &reply)
                                .await;
                            self.events.emit(EventKind::TaskCompleted {
                                conversation_id: task.conversation_id.clone(),
                                correlation_id: task.correlation_id.clone(),
                                rounds: outcome.rounds,
                            });
                        }
                        _ => {
                            let failure = outcome.failure.unwrap_or_else(|| {
                                OrchestratorError::consistency("loop failed without an error")
                            });
                            self.fail(&task, &failure).await;
                        }
                    },
                }
            }
            Err(err) => {
                self.record(&task.conversation_id, ROLE_USER, &task.message_text)
                    .await;
                self.fail(&task, &err).await;
            }
        }

        queue.clear_cancel(&task.conversation_id);
    }

    /// Fatal path: report the failure and still answer the user.
    async fn fail(&self, task: &Task, err: &OrchestratorError) {
        log::error!(
            "task {} for conversation {} failed: {err}",
            task.correlation_id,
            task.conversation_id
        );
        self.events.emit(EventKind::TaskFailed {
            conversation_id: task.conversation_id.clone(),
            correlation_id: task.correlation_id.clone(),
            error: err.to_string(),
        });
        let degraded = self.degraded_reply.clone();
        self.deliver(task, &degraded).await;
        self.record(&task.conversation_id, ROLE_ASSISTANT, &degraded)
            .await;
    }

    /// Fire-and-forget delivery; a refused reply never fails the task.
    async fn deliver(&self, task: &Task, reply_text: &str) {
        let reply = OutboundReply {
            conversation_id: task.conversation_id.clone(),
            reply_text: reply_text.to_string(),
            correlation_id: task.correlation_id.clone(),
        };
        match self.outbox.publish(&reply).await {
            Ok(()) => {
                self.events.emit(EventKind::ReplyPublished {
                    conversation_id: task.conversation_id.clone(),
                    correlation_id: task.correlation_id.clone(),
                });
            }
            Err(err) => {
                log::warn!(
                    "reply delivery failed for conversation {}: {err}",
                    task.conversation_id
                );
                self.events.emit(EventKind::PublishFailed {
                    conversation_id: task.conversation_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    async fn record(&self, conversation_id: &str, role: &str, content: &str) {
        if let Err(err) = self.history.arecord(conversation_id, role, content).await {
            log::warn!("transcript write failed for conversation {conversation_id}: {err}");
        }
    }
}

impl std::fmt::Debug for TaskPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPipeline").finish_non_exhaustive()
    }
}

/// Start one worker per queue shard. Workers exit when the queue closes.
/// Valid once per queue; the shard receivers move into the workers.
pub fn spawn_workers(queue: Arc<TaskQueue>, pipeline: Arc<TaskPipeline>) -> Vec<JoinHandle<()>> {
    let receivers = queue.take_receivers();
    if receivers.is_empty() {
        log::warn!("spawn_workers called with no shard receivers left");
    }
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, mut rx)| {
            let queue = Arc::clone(&queue);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                log::debug!("worker {worker_id} started");
                while let Some(task) = rx.recv().await {
                    pipeline.process(&queue, task).await;
                }
                log::debug!("worker {worker_id} stopped");
            })
        })
        .collect()
}
