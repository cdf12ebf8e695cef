//! Outbound reply publishing.
//!
//! Replies leave through a webhook POST, fire-and-forget: a delivery
//! failure is logged and reported on the event bus but never fails the
//! task that produced the reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::error::OrchestratorError;

/// The reply payload delivered to the configured webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub conversation_id: String,
    pub reply_text: String,
    pub correlation_id: String,
}

/// Somewhere replies can be delivered. The worker only depends on this
/// seam, so tests swap in a recording sink.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn publish(&self, reply: &OutboundReply) -> Result<(), OrchestratorError>;
}

/// Webhook-backed [`ReplySink`]. With no URL configured, publishing logs
/// the reply and succeeds, which keeps single-binary setups working.
#[derive(Debug, Clone)]
pub struct HttpOutbox {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpOutbox {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, OrchestratorError> {
        Self::new(cfg.outbox_url.clone(), cfg.tool_timeout)
    }
}

#[async_trait]
impl ReplySink for HttpOutbox {
    async fn publish(&self, reply: &OutboundReply) -> Result<(), OrchestratorError> {
        let Some(url) = self.url.as_deref() else {
            log::info!(
                "no outbox configured; reply for conversation {}: {}",
                reply.conversation_id,
                reply.reply_text
            );
            return Ok(());
        };
        let response = self.client.post(url).json(reply).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::transient(format!(
                "outbox webhook returned {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn reply() -> OutboundReply {
        OutboundReply {
            conversation_id: "conv-1".to_string(),
            reply_text: "hello".to_string(),
            correlation_id: "corr-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_posts_payload() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/webhook",
                post(
                    |State(seen): State<Arc<Mutex<Option<Value>>>>,
                     Json(body): Json<Value>| async move {
                        *seen.lock().unwrap() = Some(body);
                        axum::http::StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        let base = serve(app).await;

        let outbox =
            HttpOutbox::new(Some(format!("{base}/webhook")), Duration::from_secs(2)).unwrap();
        outbox.publish(&reply()).await.unwrap();

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["conversation_id"], "conv-1");
        assert_eq!(body["reply_text"], "hello");
        assert_eq!(body["correlation_id"], "corr-1");
    }

    #[tokio::test]
    async fn test_unconfigured_outbox_succeeds() {
        let outbox = HttpOutbox::new(None, Duration::from_secs(2)).unwrap();
        assert!(outbox.publish(&reply()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_failure_is_transient() {
        let app = Router::new().route(
            "/webhook",
            post(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = serve(app).await;

        let outbox =
            HttpOutbox::new(Some(format!("{base}/webhook")), Duration::from_secs(2)).unwrap();
        let err = outbox.publish(&reply()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
