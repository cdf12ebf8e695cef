//! HTTP surface: task intake plus the personality administration API.
//!
//! # Endpoints
//!
//! - `GET  /health`                        — liveness probe
//! - `POST /tasks`                         — enqueue a conversational task (202)
//! - `POST /conversations/:id/cancel`      — abort the in-flight loop, if any
//! - `GET  /personalities`                 — list personalities
//! - `POST /personalities`                 — create (201)
//! - `PUT  /personalities/:id`             — partial update
//! - `DELETE /personalities/:id`           — delete (refused while active)
//! - `POST /personalities/:id/activate`    — atomic active swap
//! - `GET  /personalities/:id/history`     — evolution log, newest first
//! - `POST /personalities/:id/rollback`    — new log cloning a prior entry
//! - `POST /personalities/:id/reset`       — new log with empty traits
//! - `POST /evolve`                        — manual evolution trigger
//! - `GET  /tools`                         — currently discovered manifests

pub mod routes;

pub use routes::{app_router, AppState};
