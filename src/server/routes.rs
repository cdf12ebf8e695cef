//! Axum route handlers for the orchestration engine.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::OrchestratorError;
use crate::events::{EventBus, EventKind};
use crate::intake::{Task, TaskQueue};
use crate::personality::evolution::EvolutionManager;
use crate::personality::PersonalityStore;
use crate::tools::ToolRegistry;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PersonalityStore>,
    pub evolution: Arc<EvolutionManager>,
    pub registry: Arc<ToolRegistry>,
    pub queue: Arc<TaskQueue>,
    pub events: Arc<EventBus>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tasks", post(submit_task_handler))
        .route("/conversations/:id/cancel", post(cancel_handler))
        .route("/personalities", get(list_personalities_handler))
        .route("/personalities", post(create_personality_handler))
        .route("/personalities/:id", put(update_personality_handler))
        .route("/personalities/:id", delete(delete_personality_handler))
        .route("/personalities/:id/activate", post(activate_handler))
        .route("/personalities/:id/history", get(history_handler))
        .route("/personalities/:id/rollback", post(rollback_handler))
        .route("/personalities/:id/reset", post(reset_handler))
        .route("/evolve", post(evolve_handler))
        .route("/tools", get(list_tools_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map the error taxonomy onto HTTP statuses with an `{error}` body.
fn error_response(err: OrchestratorError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        OrchestratorError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::NotFound { .. } => StatusCode::NOT_FOUND,
        OrchestratorError::Consistency { .. } => StatusCode::CONFLICT,
        // Queue backpressure and unreachable collaborators: try again later.
        OrchestratorError::TransientNetwork { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

// ---------------------------------------------------------------------------
// Health & intake
// ---------------------------------------------------------------------------

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

#[derive(Debug, Deserialize)]
struct TaskRequest {
    conversation_id: String,
    message_text: String,
    /// Caller-supplied correlation id; one is generated when absent.
    correlation_id: Option<String>,
}

/// POST /tasks — validate and enqueue; the reply arrives via the outbox.
async fn submit_task_handler(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut task = Task::new(request.conversation_id, request.message_text);
    if let Some(id) = request
        .correlation_id
        .filter(|id| !id.trim().is_empty())
    {
        task.correlation_id = id;
    }
    let correlation_id = state.queue.enqueue(task).map_err(error_response)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "correlation_id": correlation_id })),
    ))
}

/// POST /conversations/:id/cancel — abort the in-flight loop for a
/// conversation. With nothing in flight this is a no-op, not an error.
async fn cancel_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    let cancelled = state.queue.cancel(&conversation_id);
    Json(json!({
        "conversation_id": conversation_id,
        "cancelled": cancelled,
    }))
}

// ---------------------------------------------------------------------------
// Personality administration
// ---------------------------------------------------------------------------

/// GET /personalities — all personalities, oldest first.
async fn list_personalities_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let personalities = state.store.alist().await.map_err(error_response)?;
    Ok(Json(json!({ "personalities": personalities })))
}

#[derive(Debug, Deserialize)]
struct CreatePersonalityRequest {
    name: String,
    base_prompt: String,
}

/// POST /personalities — create; the very first personality becomes active.
async fn create_personality_handler(
    State(state): State<AppState>,
    Json(request): Json<CreatePersonalityRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let personality = state
        .store
        .acreate(&request.name, &request.base_prompt)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(json!(personality))))
}

/// PUT /personalities/:id — partial update of name/base prompt.
async fn update_personality_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<crate::personality::PersonalityUpdate>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let personality = state
        .store
        .aupdate(&id, update)
        .await
        .map_err(error_response)?;
    Ok(Json(json!(personality)))
}

/// DELETE /personalities/:id — refused for the active personality (409).
async fn delete_personality_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.store.adelete(&id).await.map_err(error_response)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

/// POST /personalities/:id/activate — atomic swap of the active flag.
async fn activate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let personality = state.store.aactivate(&id).await.map_err(error_response)?;
    state.events.emit(EventKind::PersonalityActivated {
        personality_id: personality.id.clone(),
    });
    Ok(Json(json!(personality)))
}

/// GET /personalities/:id/history — evolution log entries, newest first.
async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let history = state.store.ahistory(&id).await.map_err(error_response)?;
    Ok(Json(json!({ "history": history })))
}

#[derive(Debug, Deserialize)]
struct RollbackRequest {
    log_id: String,
}

/// POST /personalities/:id/rollback — append a log cloning a prior entry.
async fn rollback_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let log = state
        .store
        .arollback(&id, &request.log_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!(log)))
}

/// POST /personalities/:id/reset — append a log with empty traits.
async fn reset_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let log = state.store.areset(&id).await.map_err(error_response)?;
    Ok(Json(json!(log)))
}

#[derive(Debug, Deserialize)]
struct EvolveRequest {
    reason: Option<String>,
}

/// POST /evolve — run one evolution pass for the active personality.
async fn evolve_handler(
    State(state): State<AppState>,
    body: Option<Json<EvolveRequest>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let reason = body
        .and_then(|Json(r)| r.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Manual trigger".to_string());
    let log = state
        .evolution
        .evolve(&reason)
        .await
        .map_err(error_response)?;
    Ok(Json(json!(log)))
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// GET /tools — the registry's current view of discovered manifests.
async fn list_tools_handler(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .registry
        .discover()
        .await
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.manifest.name,
                "description": tool.manifest.description,
                "parameters": tool.manifest.parameters,
                "endpoint": tool.endpoint,
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
