//! HTTP client for an OpenAI-compatible model backend.
//!
//! Chat completions go to `POST /v1/chat/completions` with the transcript
//! and, when tools are advertised, a `tools` list with `tool_choice: auto`.
//! Embeddings go to `POST /v1/embeddings` with a task-type hint. Transient
//! failures (connect errors, timeouts, 429, 5xx) are retried with a doubling
//! delay up to the configured budget; other 4xx responses are fatal for the
//! call and never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::OrchestratorError;

use super::backend::ModelBackend;
use super::transcript::{
    ChatMessage, EmbeddingTaskType, ModelResponse, ToolCallRequest, ToolSchema,
};

/// Production [`ModelBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpModelBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl HttpModelBackend {
    /// Build a backend client for `base_url` with a per-call timeout.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_retries,
            retry_base_delay: Duration::from_millis(500),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, OrchestratorError> {
        Self::new(
            &cfg.model_base_url,
            &cfg.model_name,
            cfg.model_timeout,
            cfg.model_max_retries,
        )
    }

    /// Override the backoff base delay (used by tests to keep retries fast).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        temperature: f64,
    ) -> Value {
        let wire_messages: Vec<Value> = messages.iter().map(message_to_wire).collect();
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": temperature,
        });
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tool_defs);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// POST with the bounded retry/backoff policy shared by both endpoints.
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value, OrchestratorError> {
        let mut retry_delay = self.retry_base_delay;
        let mut last_err: Option<OrchestratorError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::debug!("retrying model call, attempt {attempt} after {retry_delay:?}");
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }
            match self.client.post(url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<Value>().await?);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        log::warn!("model backend returned {status}, will retry if budget remains");
                        last_err = Some(OrchestratorError::transient(format!(
                            "model backend returned {status}: {text}"
                        )));
                        continue;
                    }
                    return Err(OrchestratorError::validation(format!(
                        "model backend rejected request ({status}): {text}"
                    )));
                }
                Err(err) => {
                    log::warn!("model backend request failed: {err}");
                    last_err = Some(err.into());
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| OrchestratorError::transient("model backend retries exhausted")))
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        temperature: f64,
    ) -> Result<ModelResponse, OrchestratorError> {
        let body = self.build_request_body(messages, tools, temperature);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self.post_with_retry(&url, &body).await?;
        parse_completions_response(&response)
    }

    async fn embed(
        &self,
        text: &str,
        task_type: EmbeddingTaskType,
    ) -> Result<Vec<f32>, OrchestratorError> {
        let body = json!({ "content": text, "task_type": task_type.as_str() });
        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self.post_with_retry(&url, &body).await?;
        parse_embedding_response(&response)
    }
}

// ---------------------------------------------------------------------------
// Wire mapping
// ---------------------------------------------------------------------------

fn message_to_wire(msg: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": msg.role.as_str(),
        "content": msg.content.clone(),
    });
    if let Some(calls) = &msg.tool_calls {
        let wire_calls: Vec<Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(wire_calls);
    }
    if let Some(call_id) = &msg.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    wire
}

/// Interpret a completions payload as either tool calls or final text.
pub(crate) fn parse_completions_response(
    response: &Value,
) -> Result<ModelResponse, OrchestratorError> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| {
            OrchestratorError::validation("model response missing choices[0].message")
        })?;

    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        if !calls.is_empty() {
            let mut requests = Vec::with_capacity(calls.len());
            for (index, call) in calls.iter().enumerate() {
                let id = call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call-{index}"));
                let function = call.get("function").ok_or_else(|| {
                    OrchestratorError::validation("tool call missing function object")
                })?;
                let name = function
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| OrchestratorError::validation("tool call missing name"))?
                    .to_string();
                // Arguments arrive as a JSON string; unparseable arguments are
                // passed through raw so schema validation can reject them with
                // a message the model gets to see.
                let arguments = match function.get("arguments") {
                    Some(Value::String(raw)) => {
                        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                    }
                    Some(value) => value.clone(),
                    None => json!({}),
                };
                requests.push(ToolCallRequest { id, name, arguments });
            }
            return Ok(ModelResponse::ToolCalls(requests));
        }
    }

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();
    if content.is_empty() {
        return Err(OrchestratorError::validation(
            "model returned an empty completion",
        ));
    }
    Ok(ModelResponse::Text(content.to_string()))
}

fn parse_embedding_response(response: &Value) -> Result<Vec<f32>, OrchestratorError> {
    // The gateway answers {"embedding": [...]}; plain OpenAI shape
    // {"data": [{"embedding": [...]}]} is accepted too.
    let vector = response
        .get("embedding")
        .or_else(|| {
            response
                .get("data")
                .and_then(|d| d.get(0))
                .and_then(|d| d.get("embedding"))
        })
        .and_then(|v| v.as_array())
        .ok_or_else(|| OrchestratorError::validation("embedding response missing vector"))?;
    Ok(vector
        .iter()
        .filter_map(|v| v.as_f64())
        .map(|v| v as f32)
        .collect())
}
