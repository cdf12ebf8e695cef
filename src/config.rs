//! Runtime configuration for the orchestration engine.
//!
//! All tunables are read from the environment once at startup via
//! [`Config::from_env`]; every knob has a default so the engine runs with an
//! empty environment (collaborators that are not configured are treated as
//! absent, not as errors).
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PORT` | `8080` | HTTP listen port |
//! | `DATABASE_PATH` | `colloquy.db` | SQLite file for personalities + transcripts |
//! | `MODEL_BASE_URL` | `http://localhost:8000` | Model backend (OpenAI-compatible) |
//! | `MODEL_NAME` | `default` | Model identifier forwarded to the backend |
//! | `MODEL_TEMPERATURE` | `0.7` | Sampling temperature for chat turns |
//! | `EVOLUTION_TEMPERATURE` | `0.7` | Sampling temperature for trait analysis |
//! | `MEMORY_BASE_URL` | unset | Memory collaborator; unset disables retrieval |
//! | `TOOL_ENDPOINTS` | unset | Comma-separated tool service base URLs |
//! | `OUTBOX_URL` | unset | Webhook for outbound replies; unset logs replies |
//! | `MEMORY_SCORE_THRESHOLD` | `0.6` | Minimum relevance score for retained facts |
//! | `MEMORY_SEARCH_LIMIT` | `5` | Maximum facts retained per task |
//! | `MAX_TOOL_ROUNDS` | `4` | Tool-call rounds allowed per task |
//! | `MODEL_MAX_RETRIES` | `2` | Extra attempts for transient model failures |
//! | `MODEL_TIMEOUT_SECS` | `30` | Per-call timeout against the model backend |
//! | `TOOL_TIMEOUT_SECS` | `10` | Per-call timeout against tool endpoints |
//! | `MEMORY_TIMEOUT_SECS` | `10` | Per-call timeout against the memory service |
//! | `TOOL_CACHE_TTL_SECS` | `300` | Manifest cache time-to-live |
//! | `HISTORY_WINDOW` | `12` | Recent transcript entries included in context |
//! | `EVOLUTION_HISTORY_WINDOW` | `50` | Transcript entries analyzed by evolve |
//! | `EVOLUTION_INTERVAL_SECS` | `0` | Scheduled evolution period; `0` disables |
//! | `WORKER_COUNT` | `4` | Concurrent reasoning-loop workers |
//! | `QUEUE_CAPACITY` | `1024` | Bounded task queue depth |
//! | `DEGRADED_REPLY` | see below | Reply published when a task fails |

use std::env;
use std::time::Duration;

/// Reply text published when a task fails fatally, so the user is never left
/// without a response.
pub const DEFAULT_DEGRADED_REPLY: &str =
    "Sorry, I ran into a problem and couldn't finish that thought. Please try again.";

/// Engine-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub model_base_url: String,
    pub model_name: String,
    pub model_temperature: f64,
    pub evolution_temperature: f64,
    pub memory_base_url: Option<String>,
    pub tool_endpoints: Vec<String>,
    pub outbox_url: Option<String>,
    pub score_threshold: f64,
    pub search_limit: usize,
    pub max_tool_rounds: u32,
    pub model_max_retries: u32,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub memory_timeout: Duration,
    pub tool_cache_ttl: Duration,
    pub history_window: usize,
    pub evolution_history_window: usize,
    pub evolution_interval: Option<Duration>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub degraded_reply: String,
}

impl Config {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let evolution_interval_secs: u64 = parsed_env("EVOLUTION_INTERVAL_SECS", 0);
        Self {
            port: parsed_env("PORT", 8080),
            database_path: env_var_or("DATABASE_PATH", "colloquy.db"),
            model_base_url: env_var_or("MODEL_BASE_URL", "http://localhost:8000"),
            model_name: env_var_or("MODEL_NAME", "default"),
            model_temperature: parsed_env("MODEL_TEMPERATURE", 0.7),
            evolution_temperature: parsed_env("EVOLUTION_TEMPERATURE", 0.7),
            memory_base_url: env::var("MEMORY_BASE_URL").ok().filter(|v| !v.is_empty()),
            tool_endpoints: parse_endpoints(&env_var_or("TOOL_ENDPOINTS", "")),
            outbox_url: env::var("OUTBOX_URL").ok().filter(|v| !v.is_empty()),
            score_threshold: parsed_env("MEMORY_SCORE_THRESHOLD", 0.6),
            search_limit: parsed_env("MEMORY_SEARCH_LIMIT", 5),
            max_tool_rounds: parsed_env("MAX_TOOL_ROUNDS", 4),
            model_max_retries: parsed_env("MODEL_MAX_RETRIES", 2),
            model_timeout: Duration::from_secs(parsed_env("MODEL_TIMEOUT_SECS", 30)),
            tool_timeout: Duration::from_secs(parsed_env("TOOL_TIMEOUT_SECS", 10)),
            memory_timeout: Duration::from_secs(parsed_env("MEMORY_TIMEOUT_SECS", 10)),
            tool_cache_ttl: Duration::from_secs(parsed_env("TOOL_CACHE_TTL_SECS", 300)),
            history_window: parsed_env("HISTORY_WINDOW", 12),
            evolution_history_window: parsed_env("EVOLUTION_HISTORY_WINDOW", 50),
            evolution_interval: (evolution_interval_secs > 0)
                .then(|| Duration::from_secs(evolution_interval_secs)),
            worker_count: parsed_env("WORKER_COUNT", 4).max(1),
            queue_capacity: parsed_env("QUEUE_CAPACITY", 1024).max(1),
            degraded_reply: env_var_or("DEGRADED_REPLY", DEFAULT_DEGRADED_REPLY),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: "colloquy.db".to_string(),
            model_base_url: "http://localhost:8000".to_string(),
            model_name: "default".to_string(),
            model_temperature: 0.7,
            evolution_temperature: 0.7,
            memory_base_url: None,
            tool_endpoints: Vec::new(),
            outbox_url: None,
            score_threshold: 0.6,
            search_limit: 5,
            max_tool_rounds: 4,
            model_max_retries: 2,
            model_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
            memory_timeout: Duration::from_secs(10),
            tool_cache_ttl: Duration::from_secs(300),
            history_window: 12,
            evolution_history_window: 50,
            evolution_interval: None,
            worker_count: 4,
            queue_capacity: 1024,
            degraded_reply: DEFAULT_DEGRADED_REPLY.to_string(),
        }
    }
}

/// Read an environment variable with a fallback.
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back on absence or a
/// parse failure (a bad value is logged, not fatal).
fn parsed_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparseable {key}={raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Split a comma-separated endpoint list, trimming blanks and trailing
/// slashes.
fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
