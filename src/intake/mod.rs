//! Task intake: validation, queueing, and per-conversation serialization.
//!
//! The queue is sharded, one bounded FIFO shard per worker. A conversation
//! is pinned to a shard the first time it is seen (round-robin), so every
//! task for that conversation flows through the same worker in arrival
//! order and at most one loop per conversation is ever in flight. Distinct
//! conversations land on distinct shards and run concurrently.

pub mod worker;

pub use worker::{spawn_workers, TaskPipeline};

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OrchestratorError;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One incoming message to be answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub conversation_id: String,
    pub message_text: String,
    /// Assigned at intake; carried through every event and the outbound reply.
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

impl Task {
    pub fn new(conversation_id: impl Into<String>, message_text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_text: message_text.into(),
            correlation_id: Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.conversation_id.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "conversation_id must not be empty",
            ));
        }
        if self.message_text.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "message_text must not be empty",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Sharded FIFO work queue with cancellation bookkeeping.
pub struct TaskQueue {
    shards: Vec<mpsc::Sender<Task>>,
    receivers: parking_lot::Mutex<Vec<mpsc::Receiver<Task>>>,
    /// Conversation -> shard pinning. Grows with distinct conversations;
    /// entries are never evicted because re-pinning would break ordering.
    assignments: DashMap<String, usize>,
    next_shard: AtomicUsize,
    cancels: DashMap<String, CancellationToken>,
}

impl TaskQueue {
    /// `capacity` is the total queue bound, split evenly across `workers`
    /// shards (at least one slot each).
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let per_shard = (capacity / workers).max(1);
        let mut shards = Vec::with_capacity(workers);
        let mut receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(per_shard);
            shards.push(tx);
            receivers.push(rx);
        }
        Self {
            shards,
            receivers: parking_lot::Mutex::new(receivers),
            assignments: DashMap::new(),
            next_shard: AtomicUsize::new(0),
            cancels: DashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    /// Validate and enqueue on the conversation's shard. A full shard is
    /// backpressure, not data loss: the caller gets a retryable error and
    /// the task is never accepted.
    pub fn enqueue(&self, task: Task) -> Result<String, OrchestratorError> {
        task.validate()?;
        let shard = *self
            .assignments
            .entry(task.conversation_id.clone())
            .or_insert_with(|| {
                self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len()
            });
        let correlation_id = task.correlation_id.clone();
        self.shards[shard].try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                OrchestratorError::transient("task queue is full, retry later")
            }
            mpsc::error::TrySendError::Closed(_) => {
                OrchestratorError::consistency("task queue receiver dropped")
            }
        })?;
        Ok(correlation_id)
    }

    /// Hand out the shard receivers, one per worker. Valid once; later
    /// calls return an empty vec.
    pub fn take_receivers(&self) -> Vec<mpsc::Receiver<Task>> {
        std::mem::take(&mut *self.receivers.lock())
    }

    /// Token the in-flight loop for this conversation watches.
    pub fn register_cancel(&self, conversation_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancels
            .insert(conversation_id.to_string(), token.clone());
        token
    }

    pub fn clear_cancel(&self, conversation_id: &str) {
        self.cancels.remove(conversation_id);
    }

    /// Abort the in-flight loop for a conversation, if any. Returns whether
    /// a loop was there to cancel; queued tasks that have not started are
    /// not affected.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.cancels.get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("workers", &self.shards.len())
            .field("conversations", &self.assignments.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_rejected() {
        assert!(Task::new("", "hello").validate().is_err());
        assert!(Task::new("conv-1", "   ").validate().is_err());
        assert!(Task::new("conv-1", "hello").validate().is_ok());
    }

    #[tokio::test]
    async fn test_single_shard_preserves_arrival_order() {
        let queue = TaskQueue::new(1, 8);
        queue.enqueue(Task::new("conv-1", "first")).unwrap();
        queue.enqueue(Task::new("conv-2", "second")).unwrap();
        queue.enqueue(Task::new("conv-1", "third")).unwrap();

        let mut receivers = queue.take_receivers();
        assert_eq!(receivers.len(), 1);
        let rx = &mut receivers[0];
        assert_eq!(rx.recv().await.unwrap().message_text, "first");
        assert_eq!(rx.recv().await.unwrap().message_text, "second");
        assert_eq!(rx.recv().await.unwrap().message_text, "third");
    }

    #[tokio::test]
    async fn test_conversation_is_pinned_to_one_shard() {
        let queue = TaskQueue::new(4, 64);
        for i in 0..6 {
            queue.enqueue(Task::new("conv-1", format!("msg-{i}"))).unwrap();
        }

        let mut receivers = queue.take_receivers();
        let shard = *queue.assignments.get("conv-1").unwrap();
        for i in 0..6 {
            let task = receivers[shard].try_recv().unwrap();
            assert_eq!(task.message_text, format!("msg-{i}"));
        }
        for (idx, rx) in receivers.iter_mut().enumerate() {
            if idx != shard {
                assert!(rx.try_recv().is_err(), "shard {idx} should be empty");
            }
        }
    }

    #[tokio::test]
    async fn test_new_conversations_spread_round_robin() {
        let queue = TaskQueue::new(2, 16);
        queue.enqueue(Task::new("conv-a", "a")).unwrap();
        queue.enqueue(Task::new("conv-b", "b")).unwrap();

        let shard_a = *queue.assignments.get("conv-a").unwrap();
        let shard_b = *queue.assignments.get("conv-b").unwrap();
        assert_ne!(shard_a, shard_b);
    }

    #[tokio::test]
    async fn test_full_shard_rejects_with_retryable_error() {
        let queue = TaskQueue::new(1, 1);
        queue.enqueue(Task::new("conv-1", "kept")).unwrap();
        let err = queue.enqueue(Task::new("conv-1", "rejected")).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_receivers_can_only_be_taken_once() {
        let queue = TaskQueue::new(3, 8);
        assert_eq!(queue.take_receivers().len(), 3);
        assert!(queue.take_receivers().is_empty());
    }

    #[test]
    fn test_cancel_without_inflight_loop_is_noop() {
        let queue = TaskQueue::new(1, 8);
        assert!(!queue.cancel("conv-1"));

        let token = queue.register_cancel("conv-1");
        assert!(queue.cancel("conv-1"));
        assert!(token.is_cancelled());

        queue.clear_cancel("conv-1");
        assert!(!queue.cancel("conv-1"));
    }
}
