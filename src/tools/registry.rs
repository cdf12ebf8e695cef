//! Tool discovery with a TTL manifest cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};
use crate::model::ToolSchema;

use super::manifest::{DiscoveredTool, ToolManifest};

#[derive(Default)]
struct CacheState {
    tools: HashMap<String, DiscoveredTool>,
    refreshed_at: Option<Instant>,
}

/// Polls configured tool endpoints for manifests and caches the result.
///
/// A refresh that fails entirely keeps serving the stale cache; individual
/// endpoints that fail to answer are skipped with a warning so one broken
/// tool cannot hide the rest.
pub struct ToolRegistry {
    client: reqwest::Client,
    endpoints: Vec<String>,
    ttl: Duration,
    cache: RwLock<CacheState>,
    events: Arc<EventBus>,
}

impl ToolRegistry {
    pub fn new(
        endpoints: Vec<String>,
        ttl: Duration,
        timeout: Duration,
        events: Arc<EventBus>,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoints,
            ttl,
            cache: RwLock::new(CacheState::default()),
            events,
        })
    }

    pub fn from_config(cfg: &Config, events: Arc<EventBus>) -> Result<Self, OrchestratorError> {
        Self::new(
            cfg.tool_endpoints.clone(),
            cfg.tool_cache_ttl,
            cfg.tool_timeout,
            events,
        )
    }

    fn cache_is_fresh(&self) -> bool {
        let cache = self.cache.read();
        matches!(cache.refreshed_at, Some(at) if at.elapsed() < self.ttl)
    }

    /// Current tool set, refreshing manifests when the cache has expired.
    pub async fn discover(&self) -> Vec<DiscoveredTool> {
        if !self.cache_is_fresh() {
            self.refresh().await;
        }
        let cache = self.cache.read();
        let mut tools: Vec<DiscoveredTool> = cache.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        tools
    }

    /// Look up one tool by manifest name.
    pub async fn get(&self, name: &str) -> Option<DiscoveredTool> {
        if !self.cache_is_fresh() {
            self.refresh().await;
        }
        self.cache.read().tools.get(name).cloned()
    }

    /// Schemas for every known tool, for advertising to the model.
    pub async fn schemas(&self) -> Vec<ToolSchema> {
        self.discover().await.iter().map(DiscoveredTool::schema).collect()
    }

    async fn refresh(&self) {
        let mut fresh: HashMap<String, DiscoveredTool> = HashMap::new();
        let mut any_success = false;

        for endpoint in &self.endpoints {
            match self.fetch_manifest(endpoint).await {
                Ok(manifest) => {
                    any_success = true;
                    log::debug!("discovered tool '{}' at {endpoint}", manifest.name);
                    if let Some(previous) = fresh.insert(
                        manifest.name.clone(),
                        DiscoveredTool {
                            manifest,
                            endpoint: endpoint.clone(),
                        },
                    ) {
                        log::warn!(
                            "duplicate tool name '{}'; keeping {endpoint}",
                            previous.manifest.name
                        );
                    }
                }
                Err(err) => {
                    log::warn!("manifest fetch from {endpoint} failed: {err}");
                }
            }
        }

        let mut cache = self.cache.write();
        if any_success || self.endpoints.is_empty() {
            cache.tools = fresh;
            cache.refreshed_at = Some(Instant::now());
            let count = cache.tools.len();
            drop(cache);
            self.events.emit(EventKind::ToolsDiscovered { count });
        } else {
            // Every endpoint failed; keep the stale manifests rather than
            // dropping tools the model was already using, and wait out a TTL
            // before polling the dead endpoints again.
            log::warn!(
                "all {} manifest endpoints failed; serving {} cached tool(s)",
                self.endpoints.len(),
                cache.tools.len()
            );
            cache.refreshed_at = Some(Instant::now());
        }
    }

    async fn fetch_manifest(&self, endpoint: &str) -> Result<ToolManifest, OrchestratorError> {
        let response = self
            .client
            .get(format!("{endpoint}/manifest"))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::transient(format!(
                "manifest endpoint returned {status}"
            )));
        }
        Ok(response.json::<ToolManifest>().await?)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("endpoints", &self.endpoints)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::routing::get;
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

    fn manifest_app(name: &'static str, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/manifest",
                get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "name": name,
                        "description": "test tool",
                        "parameters": {"type": "object", "properties": {}},
                    }))
                }),
            )
            .with_state(hits)
    }

    fn registry(endpoints: Vec<String>, ttl: Duration) -> ToolRegistry {
        ToolRegistry::new(
            endpoints,
            ttl,
            Duration::from_secs(2),
            Arc::new(EventBus::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_collects_all_endpoints() {
        let weather_hits = Arc::new(AtomicUsize::new(0));
        let notes_hits = Arc::new(AtomicUsize::new(0));
        let weather = serve(manifest_app("weather", Arc::clone(&weather_hits))).await;
        let notes = serve(manifest_app("notes", Arc::clone(&notes_hits))).await;

        let registry = registry(vec![weather, notes], Duration::from_secs(300));
        let tools = registry.discover().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].manifest.name, "notes");
        assert_eq!(tools[1].manifest.name, "weather");
        assert!(registry.get("weather").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_refetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(manifest_app("weather", Arc::clone(&hits))).await;

        let registry = registry(vec![base], Duration::from_secs(300));
        registry.discover().await;
        registry.discover().await;
        registry.get("weather").await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_repolls() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(manifest_app("weather", Arc::clone(&hits))).await;

        let registry = registry(vec![base], Duration::ZERO);
        registry.discover().await;
        registry.discover().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_serves_stale_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(manifest_app("weather", Arc::clone(&hits))).await;

        // First pass fills the cache from a live endpoint; afterwards the
        // registry only knows an address nothing listens on.
        let registry = ToolRegistry::new(
            vec![base, "http://127.0.0.1:1".to_string()],
            Duration::ZERO,
            Duration::from_millis(200),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        assert_eq!(registry.discover().await.len(), 1);

        let starved = ToolRegistry::new(
            vec!["http://127.0.0.1:1".to_string()],
            Duration::ZERO,
            Duration::from_millis(200),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        {
            let mut cache = starved.cache.write();
            cache.tools = registry.cache.read().tools.clone();
            cache.refreshed_at = None;
        }
        let tools = starved.discover().await;
        assert_eq!(tools.len(), 1, "stale manifests survive a dead refresh");
    }

    #[tokio::test]
    async fn test_discovery_emits_event() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(manifest_app("weather", Arc::clone(&hits))).await;

        let events = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        events.subscribe(move |event| {
            if matches!(event.kind, EventKind::ToolsDiscovered { count: 1 }) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let registry =
            ToolRegistry::new(vec![base], Duration::from_secs(300), Duration::from_secs(2), events)
                .unwrap();
        registry.discover().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
