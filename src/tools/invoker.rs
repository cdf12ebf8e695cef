//! Tool invocation with schema validation and bounded retry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};

use super::manifest::validate_arguments;
use super::registry::ToolRegistry;

const INVOKE_MAX_RETRIES: u32 = 1;

/// Executes tool calls requested by the model.
///
/// Arguments are validated against the manifest schema before any request
/// goes out; an invalid call never reaches the tool. Failures come back as
/// structured errors so the reasoning loop can show them to the model as
/// observations instead of dying.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    client: reqwest::Client,
    retry_base_delay: Duration,
    events: Arc<EventBus>,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        timeout: Duration,
        events: Arc<EventBus>,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            registry,
            client,
            retry_base_delay: Duration::from_millis(250),
            events,
        })
    }

    pub fn from_config(
        cfg: &Config,
        registry: Arc<ToolRegistry>,
        events: Arc<EventBus>,
    ) -> Result<Self, OrchestratorError> {
        Self::new(registry, cfg.tool_timeout, events)
    }

    /// Run `tool_name` with `args`, returning the tool's JSON response body.
    pub async fn invoke(&self, tool_name: &str, args: &Value) -> Result<Value, OrchestratorError> {
        let Some(tool) = self.registry.get(tool_name).await else {
            return Err(OrchestratorError::validation(format!(
                "unknown tool '{tool_name}'"
            )));
        };
        validate_arguments(tool_name, &tool.manifest.parameters, args)?;

        self.events.emit(EventKind::ToolCallStarted {
            tool_name: tool_name.to_string(),
        });
        let result = self.run_remote(&tool.endpoint, tool_name, args).await;
        match &result {
            Ok(_) => self.events.emit(EventKind::ToolCallFinished {
                tool_name: tool_name.to_string(),
            }),
            Err(err) => self.events.emit(EventKind::ToolCallFailed {
                tool_name: tool_name.to_string(),
                error: err.to_string(),
            }),
        }
        result
    }

    async fn run_remote(
        &self,
        endpoint: &str,
        tool_name: &str,
        args: &Value,
    ) -> Result<Value, OrchestratorError> {
        let url = format!("{endpoint}/run");
        let mut retry_delay = self.retry_base_delay;
        let mut last_err: Option<OrchestratorError> = None;

        for attempt in 0..=INVOKE_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }
            match self.client.post(&url).json(args).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<Value>().await.unwrap_or(Value::Null));
                    }
                    // The tool answered; a retry would re-run whatever side
                    // effect it already attempted.
                    let text = response.text().await.unwrap_or_default();
                    return Err(OrchestratorError::tool_execution(
                        tool_name,
                        format!("tool returned {status}: {text}"),
                    ));
                }
                Err(err) => {
                    log::warn!("tool '{tool_name}' call failed: {err}");
                    last_err = Some(OrchestratorError::tool_execution(
                        tool_name,
                        err.to_string(),
                    ));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            OrchestratorError::tool_execution(tool_name, "tool retries exhausted")
        }))
    }
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn weather_tool_app(run_hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/manifest",
                get(|| async {
                    Json(json!({
                        "name": "weather",
                        "description": "Forecast lookup",
                        "parameters": {
                            "type": "object",
                            "properties": {"city": {"type": "string"}},
                            "required": ["city"],
                        },
                    }))
                }),
            )
            .route(
                "/run",
                post(|State(hits): State<Arc<AtomicUsize>>, Json(args): Json<Value>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"forecast": "sunny", "city": args["city"]}))
                }),
            )
            .with_state(run_hits)
    }

    async fn invoker_for(endpoints: Vec<String>) -> (ToolInvoker, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(
            ToolRegistry::new(
                endpoints,
                Duration::from_secs(300),
                Duration::from_secs(2),
                Arc::clone(&events),
            )
            .unwrap(),
        );
        let invoker = ToolInvoker::new(registry, Duration::from_secs(2), Arc::clone(&events))
            .unwrap();
        (invoker, events)
    }

    #[tokio::test]
    async fn test_invoke_returns_tool_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(weather_tool_app(Arc::clone(&hits))).await;
        let (invoker, _) = invoker_for(vec![base]).await;

        let result = invoker
            .invoke("weather", &json!({"city": "Oslo"}))
            .await
            .unwrap();
        assert_eq!(result["forecast"], "sunny");
        assert_eq!(result["city"], "Oslo");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_validation_error() {
        let (invoker, _) = invoker_for(Vec::new()).await;
        let err = invoker.invoke("ghost", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_tool() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(weather_tool_app(Arc::clone(&hits))).await;
        let (invoker, _) = invoker_for(vec![base]).await;

        let err = invoker.invoke("weather", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "no /run call for bad args");
    }

    #[tokio::test]
    async fn test_tool_error_reports_status_and_body() {
        let app = Router::new()
            .route(
                "/manifest",
                get(|| async {
                    Json(json!({"name": "flaky", "parameters": {"type": "object"}}))
                }),
            )
            .route(
                "/run",
                post(|| async {
                    (axum::http::StatusCode::BAD_GATEWAY, "upstream offline")
                }),
            );
        let base = serve(app).await;
        let (invoker, _) = invoker_for(vec![base]).await;

        let err = invoker.invoke("flaky", &json!({})).await.unwrap_err();
        match err {
            OrchestratorError::ToolExecution { tool, message } => {
                assert_eq!(tool, "flaky");
                assert!(message.contains("502"));
                assert!(message.contains("upstream offline"));
            }
            other => panic!("expected tool execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let app = Router::new()
            .route(
                "/manifest",
                get(|| async {
                    Json(json!({"name": "sleepy", "parameters": {"type": "object"}}))
                }),
            )
            .route(
                "/run",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Json(json!({}))
                }),
            );
        let base = serve(app).await;

        let events = Arc::new(EventBus::new());
        let registry = Arc::new(
            ToolRegistry::new(
                vec![base],
                Duration::from_secs(300),
                Duration::from_secs(2),
                Arc::clone(&events),
            )
            .unwrap(),
        );
        let invoker =
            ToolInvoker::new(registry, Duration::from_millis(100), events).unwrap();

        let err = invoker.invoke("sleepy", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_invoke_emits_lifecycle_events() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(weather_tool_app(Arc::clone(&hits))).await;
        let (invoker, events) = invoker_for(vec![base]).await;

        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        events.subscribe(move |event| match &event.kind {
            EventKind::ToolCallStarted { .. } => {
                s.fetch_add(1, Ordering::SeqCst);
            }
            EventKind::ToolCallFinished { .. } => {
                f.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        });

        invoker.invoke("weather", &json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
