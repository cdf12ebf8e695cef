//! HTTP client for the fact-memory service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;
use crate::error::OrchestratorError;

/// One similarity-search hit, already above the relevance threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedFact {
    pub text: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Client for the fact store. `base_url == None` means memory is not
/// configured; searches return empty and writes fail fast.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    client: reqwest::Client,
    base_url: Option<String>,
    search_limit: usize,
    score_threshold: f64,
}

impl MemoryClient {
    pub fn new(
        base_url: Option<String>,
        timeout: Duration,
        search_limit: usize,
        score_threshold: f64,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            search_limit,
            score_threshold,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, OrchestratorError> {
        Self::new(
            cfg.memory_base_url.clone(),
            cfg.memory_timeout,
            cfg.search_limit,
            cfg.score_threshold,
        )
    }

    /// Whether a memory service is configured at all.
    pub fn available(&self) -> bool {
        self.base_url.is_some()
    }

    /// Store a fact for later retrieval. Returns the service-assigned id.
    pub async fn add_fact(
        &self,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<String, OrchestratorError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            OrchestratorError::validation("memory service is not configured")
        })?;
        let body = json!({ "text": text, "metadata": metadata });
        let response = self
            .client
            .post(format!("{base}/facts/add"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::transient(format!(
                "memory service returned {status}: {text}"
            )));
        }
        let payload: Value = response.json().await?;
        payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::transient("memory service response missing id"))
    }

    /// Similarity search, filtered to hits at or above the score threshold.
    /// An unconfigured client returns an empty list rather than an error.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedFact>, OrchestratorError> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(Vec::new());
        };
        let body = json!({ "query": query, "limit": self.search_limit });
        let response = self
            .client
            .post(format!("{base}/facts/search"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::transient(format!(
                "memory service returned {status}: {text}"
            )));
        }
        let payload: Value = response.json().await?;
        let results: Vec<RetrievedFact> = match payload.get("results") {
            Some(results) => serde_json::from_value(results.clone())?,
            None => Vec::new(),
        };
        let threshold = self.score_threshold;
        Ok(results.into_iter().filter(|f| f.score >= threshold).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: Option<String>) -> MemoryClient {
        MemoryClient::new(base_url, Duration::from_secs(2), 5, 0.6).unwrap()
    }

    #[tokio::test]
    async fn test_unconfigured_memory_searches_empty() {
        let memory = client(None);
        assert!(!memory.available());
        assert!(memory.search("anything").await.unwrap().is_empty());
        assert!(memory.add_fact("fact", None).await.is_err());
    }

    #[tokio::test]
    async fn test_search_filters_below_threshold() {
        let app = Router::new().route(
            "/facts/search",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["limit"], 5);
                Json(json!({
                    "results": [
                        {"text": "favorite color is red", "score": 0.91},
                        {"text": "mentioned rain once", "score": 0.42},
                        {"text": "works night shifts", "score": 0.60},
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let memory = client(Some(base));
        let facts = memory.search("color").await.unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].text, "favorite color is red");
        assert_eq!(facts[1].text, "works night shifts");
    }

    #[tokio::test]
    async fn test_add_fact_returns_service_id() {
        let app = Router::new().route(
            "/facts/add",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["text"], "user is allergic to peanuts");
                Json(json!({"id": "fact-17"}))
            }),
        );
        let base = serve(app).await;

        let memory = client(Some(base));
        let id = memory
            .add_fact("user is allergic to peanuts", None)
            .await
            .unwrap();
        assert_eq!(id, "fact-17");
    }

    /// A fact stored through the write path comes back when searched with
    /// its own words, scored above the threshold; unrelated facts do not.
    #[tokio::test]
    async fn test_written_fact_is_retrieved_above_threshold() {
        use axum::extract::State;
        use std::sync::{Arc, Mutex};

        type Stored = Arc<Mutex<Vec<String>>>;
        let stored: Stored = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/facts/add",
                post(|State(stored): State<Stored>, Json(body): Json<Value>| async move {
                    let text = body["text"].as_str().unwrap_or_default().to_string();
                    stored.lock().unwrap().push(text);
                    Json(json!({"id": "fact-1"}))
                }),
            )
            .route(
                "/facts/search",
                post(|State(stored): State<Stored>, Json(body): Json<Value>| async move {
                    let query = body["query"].as_str().unwrap_or_default().to_lowercase();
                    let results: Vec<Value> = stored
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|text| {
                            let score = if text.to_lowercase().contains(&query) {
                                0.93
                            } else {
                                0.1
                            };
                            json!({"text": text, "score": score})
                        })
                        .collect();
                    Json(json!({"results": results}))
                }),
            )
            .with_state(stored);
        let base = serve(app).await;

        let memory = client(Some(base));
        memory.add_fact("favorite color is red", None).await.unwrap();
        memory
            .add_fact("enjoys hiking on weekends", None)
            .await
            .unwrap();

        let facts = memory.search("favorite color").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "favorite color is red");
        assert!(facts[0].score >= 0.6);
    }

    #[tokio::test]
    async fn test_server_error_surfaces_as_transient() {
        let app = Router::new().route(
            "/facts/search",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(app).await;

        let memory = client(Some(base));
        let err = memory.search("color").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
