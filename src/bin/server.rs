//! colloquy HTTP server binary.
//!
//! Wires the full engine together — stores, model backend, tool registry,
//! worker pool, evolution scheduler — and serves the control-plane API.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `DATABASE_PATH` — SQLite file for personalities and transcripts
//! - `MODEL_BASE_URL` — OpenAI-compatible model backend
//! - `RUST_LOG` — Tracing filter (default: "info,colloquy=debug")
//!
//! See [`colloquy::config::Config`] for the full list of knobs.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use colloquy::config::Config;
use colloquy::context::ContextAssembler;
use colloquy::events::EventBus;
use colloquy::history::TranscriptStore;
use colloquy::intake::worker::{spawn_workers, TaskPipeline};
use colloquy::intake::TaskQueue;
use colloquy::memory::MemoryClient;
use colloquy::model::{HttpModelBackend, ModelBackend};
use colloquy::outbox::{HttpOutbox, ReplySink};
use colloquy::personality::evolution::spawn_scheduler;
use colloquy::personality::{EvolutionManager, PersonalityStore};
use colloquy::reasoning::ReasoningLoop;
use colloquy::server::{app_router, AppState};
use colloquy::tools::{ToolInvoker, ToolRegistry};

/// Name and prompt for the personality seeded on first boot, so a task can be
/// processed before any personality has been created through the API.
const DEFAULT_PERSONALITY_NAME: &str = "Assistant";
const DEFAULT_BASE_PROMPT: &str =
    "You are a helpful, attentive assistant. Answer plainly and use the available tools when they help.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,colloquy=debug".into()),
        )
        .init();

    let cfg = Config::from_env();
    let bind_addr = format!("0.0.0.0:{}", cfg.port);

    // Both stores live in the same SQLite file; each manages its own tables.
    let store = Arc::new(
        PersonalityStore::new(&cfg.database_path)
            .with_context(|| format!("opening personality store at {}", cfg.database_path))?,
    );
    let history = TranscriptStore::new(&cfg.database_path)
        .with_context(|| format!("opening transcript store at {}", cfg.database_path))?;
    seed_default_personality(&store).await?;

    let events = Arc::new(EventBus::new());
    let backend: Arc<dyn ModelBackend> =
        Arc::new(HttpModelBackend::from_config(&cfg).context("building model client")?);
    let memory = MemoryClient::from_config(&cfg).context("building memory client")?;
    let registry = Arc::new(
        ToolRegistry::from_config(&cfg, Arc::clone(&events)).context("building tool registry")?,
    );
    let invoker = Arc::new(
        ToolInvoker::from_config(&cfg, Arc::clone(&registry), Arc::clone(&events))
            .context("building tool invoker")?,
    );

    // Warm the manifest cache so the first task does not pay discovery latency.
    // Discovery is infallible: endpoint failures are logged by the registry
    // itself and the stale cache is served.
    let tools = registry.discover().await;
    tracing::info!("discovered {} tool(s) at startup", tools.len());

    let assembler = Arc::new(ContextAssembler::from_config(
        &cfg,
        Arc::clone(&store),
        memory,
        history.clone(),
        Arc::clone(&events),
    ));
    let reasoning = Arc::new(ReasoningLoop::from_config(
        &cfg,
        Arc::clone(&backend),
        Arc::clone(&registry),
        Arc::clone(&invoker),
    ));
    let outbox: Arc<dyn ReplySink> =
        Arc::new(HttpOutbox::from_config(&cfg).context("building outbox")?);

    let queue = Arc::new(TaskQueue::new(cfg.worker_count, cfg.queue_capacity));
    let pipeline = Arc::new(TaskPipeline::new(
        assembler,
        reasoning,
        outbox,
        history.clone(),
        Arc::clone(&events),
        cfg.degraded_reply.clone(),
    ));
    let workers = spawn_workers(Arc::clone(&queue), pipeline);
    tracing::info!("started {} reasoning worker(s)", workers.len());

    let evolution = Arc::new(EvolutionManager::from_config(
        &cfg,
        Arc::clone(&store),
        history,
        Arc::clone(&backend),
        Arc::clone(&events),
    ));
    if let Some(interval) = cfg.evolution_interval {
        spawn_scheduler(Arc::clone(&evolution), interval);
    }

    let state = AppState {
        store,
        evolution,
        registry,
        queue,
        events,
    };
    let app = app_router(state);

    tracing::info!("colloquy server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health        — liveness probe");
    tracing::info!("  POST /tasks         — enqueue an inbound message");
    tracing::info!("  GET  /personalities — personality management");
    tracing::info!("  POST /evolve        — trigger a trait analysis");
    tracing::info!("  GET  /tools         — discovered tool manifests");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    tracing::info!("colloquy server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Create the default personality when the store is empty, so the engine is
/// usable out of the box. The first personality auto-activates on creation.
async fn seed_default_personality(store: &PersonalityStore) -> anyhow::Result<()> {
    if store.alist().await.context("listing personalities")?.is_empty() {
        let seeded = store
            .acreate(DEFAULT_PERSONALITY_NAME, DEFAULT_BASE_PROMPT)
            .await
            .context("seeding default personality")?;
        tracing::info!("seeded default personality {} ({})", seeded.name, seeded.id);
    }
    Ok(())
}
