//! Error taxonomy for the orchestration engine.
//!
//! Every fallible operation in the crate returns [`OrchestratorError`]. The
//! variants encode how a failure propagates: validation failures are reported
//! and never retried, transient network failures are retried with bounded
//! backoff at the call site, tool execution failures are surfaced to the
//! model as observations, and loop exhaustion / consistency violations are
//! fatal for the task that hit them.

use thiserror::Error;

/// Unified error type for the orchestration engine.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed task, arguments, or response. Reported, never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A collaborator was unreachable or timed out. Retried with bounded
    /// attempts and backoff at the call site.
    #[error("transient network error: {message}")]
    TransientNetwork { message: String },

    /// A tool ran but reported failure. Surfaced to the model as an
    /// observation so it can adapt; not fatal for the reasoning loop.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// The tool-call round limit was hit. Fatal for the task; a degraded
    /// reply is still published.
    #[error("tool-call round limit ({limit}) exhausted")]
    LoopExhausted { limit: u32 },

    /// An invariant would be violated (e.g. an activation race). Fatal,
    /// logged, operation rejected.
    #[error("consistency violation: {message}")]
    Consistency { message: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Local persistence failed.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl OrchestratorError {
    /// A validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// A transient network error with the given message.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// A tool execution failure for the named tool.
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// A consistency violation with the given message.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// A not-found error for the given entity kind and id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// A storage error with the given message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether a caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientNetwork {
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for OrchestratorError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage {
            message: format!("serialization: {err}"),
        }
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Storage {
            message: format!("blocking task failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(OrchestratorError::transient("timed out").is_retryable());
        assert!(!OrchestratorError::validation("bad args").is_retryable());
        assert!(!OrchestratorError::tool_execution("weather", "boom").is_retryable());
        assert!(!OrchestratorError::LoopExhausted { limit: 4 }.is_retryable());
        assert!(!OrchestratorError::consistency("two active").is_retryable());
        assert!(!OrchestratorError::not_found("personality", "p1").is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = OrchestratorError::tool_execution("weather", "upstream 500");
        assert_eq!(err.to_string(), "tool 'weather' failed: upstream 500");

        let err = OrchestratorError::LoopExhausted { limit: 4 };
        assert_eq!(err.to_string(), "tool-call round limit (4) exhausted");

        let err = OrchestratorError::not_found("evolution log", "abc");
        assert_eq!(err.to_string(), "evolution log not found: abc");
    }

    #[test]
    fn test_sqlite_errors_map_to_storage() {
        let err: OrchestratorError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, OrchestratorError::Storage { .. }));
    }
}
