//! The reasoning loop: alternating model calls and tool executions.
//!
//! One loop answers one task. It opens with the assembled context, asks the
//! model, and either finishes with a text reply or executes the requested
//! tool calls and feeds their results back as observations for the next
//! model call. Tool rounds are bounded; a model that keeps calling tools
//! past the budget fails the loop rather than running forever. Tool
//! failures are not loop failures: the model sees the error text as an
//! observation and decides what to do next.

pub mod parser;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::ContextBundle;
use crate::error::OrchestratorError;
use crate::intake::Task;
use crate::model::{ChatMessage, ModelBackend, ModelResponse, ToolCallRequest};
use crate::tools::{ToolInvoker, ToolRegistry};

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// Where a loop is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Assembling,
    AwaitingModel,
    ExecutingTool,
    Done,
    Failed,
}

/// Terminal report for a finished loop.
#[derive(Debug)]
pub struct LoopOutcome {
    pub state: LoopState,
    /// Completed tool rounds.
    pub rounds: u32,
    pub reply: Option<String>,
    pub failure: Option<OrchestratorError>,
}

impl LoopOutcome {
    fn done(rounds: u32, reply: String) -> Self {
        Self {
            state: LoopState::Done,
            rounds,
            reply: Some(reply),
            failure: None,
        }
    }

    fn failed(rounds: u32, failure: OrchestratorError) -> Self {
        Self {
            state: LoopState::Failed,
            rounds,
            reply: None,
            failure: Some(failure),
        }
    }
}

/// A loop either runs to a terminal state or is cancelled mid-flight.
#[derive(Debug)]
pub enum LoopResult {
    Finished(LoopOutcome),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Loop driver
// ---------------------------------------------------------------------------

pub struct ReasoningLoop {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
    max_rounds: u32,
    temperature: f64,
}

impl ReasoningLoop {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        invoker: Arc<ToolInvoker>,
        max_rounds: u32,
        temperature: f64,
    ) -> Self {
        Self {
            backend,
            registry,
            invoker,
            max_rounds,
            temperature,
        }
    }

    pub fn from_config(
        cfg: &Config,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        invoker: Arc<ToolInvoker>,
    ) -> Self {
        Self::new(
            backend,
            registry,
            invoker,
            cfg.max_tool_rounds,
            cfg.model_temperature,
        )
    }

    /// Drive one task to completion, cancellation, or failure.
    ///
    /// Cancellation is checked at the suspension points (model call, tool
    /// execution); a cancelled loop stops without producing a reply.
    pub async fn run(
        &self,
        task: &Task,
        bundle: &ContextBundle,
        cancel: &CancellationToken,
    ) -> LoopResult {
        let mut state = LoopState::Assembling;
        log::trace!("conversation {} state {:?}", task.conversation_id, state);
        let tools = self.registry.schemas().await;
        let mut messages = bundle.messages(&task.message_text);
        let mut rounds: u32 = 0;

        loop {
            state = LoopState::AwaitingModel;
            log::trace!(
                "conversation {} state {:?}, round {}",
                task.conversation_id,
                state,
                rounds
            );
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!(
                        "loop cancelled for conversation {} while awaiting model",
                        task.conversation_id
                    );
                    return LoopResult::Cancelled;
                }
                r = self.backend.chat(&messages, &tools, self.temperature) => r,
            };
            let response = match response {
                Ok(response) => response,
                Err(err) => return LoopResult::Finished(LoopOutcome::failed(rounds, err)),
            };

            let calls = match response {
                ModelResponse::ToolCalls(calls) => calls,
                ModelResponse::Text(text) => match parser::extract_tool_call(&text) {
                    Some(call) => vec![call],
                    None => return LoopResult::Finished(LoopOutcome::done(rounds, text)),
                },
            };

            rounds += 1;
            if rounds > self.max_rounds {
                log::warn!(
                    "conversation {} hit the tool round limit ({})",
                    task.conversation_id,
                    self.max_rounds
                );
                return LoopResult::Finished(LoopOutcome::failed(
                    self.max_rounds,
                    OrchestratorError::LoopExhausted {
                        limit: self.max_rounds,
                    },
                ));
            }

            state = LoopState::ExecutingTool;
            log::trace!(
                "conversation {} state {:?}, {} call(s)",
                task.conversation_id,
                state,
                calls.len()
            );
            messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
            let observations = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!(
                        "loop cancelled for conversation {} during tool execution",
                        task.conversation_id
                    );
                    return LoopResult::Cancelled;
                }
                o = self.execute_round(&calls) => o,
            };
            messages.extend(observations);
        }
    }

    /// Run every call of one round concurrently, observations in call order.
    async fn execute_round(&self, calls: &[ToolCallRequest]) -> Vec<ChatMessage> {
        let invocations = calls
            .iter()
            .map(|call| self.invoker.invoke(&call.name, &call.arguments));
        let results = futures::future::join_all(invocations).await;

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| {
                let observation = match result {
                    Ok(value) => value.to_string(),
                    // The model sees the failure and can retry, rephrase,
                    // or answer without the tool.
                    Err(err) => format!("Error: {err}"),
                };
                ChatMessage::tool_observation(&call.id, observation)
            })
            .collect()
    }
}

impl std::fmt::Debug for ReasoningLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningLoop")
            .field("max_rounds", &self.max_rounds)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}
