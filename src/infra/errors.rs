// src/infra/errors.rs — Error types for tuneloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Inference service errors (retriable)
    #[error("Inference service '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Degradable conditions
    #[error("Timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("Malformed response for contract '{contract}': {message}")]
    MalformedResponse { contract: String, message: String },

    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    #[error("Tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    // Fatal to the current run
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::Provider {
                retriable: true,
                ..
            } | EngineError::RateLimited { .. }
        )
    }

    /// Only persistence failures abort an iteration; everything else degrades.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Persistence(_) | EngineError::StoreUnavailable(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    pub fn malformed(contract: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::MalformedResponse {
            contract: contract.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let e = EngineError::Provider {
            provider: "mock".into(),
            message: "503".into(),
            retriable: true,
        };
        assert!(e.is_retriable());
        assert!(!e.is_fatal());

        let e = EngineError::RateLimited {
            provider: "mock".into(),
            retry_after_ms: 100,
        };
        assert!(e.is_retriable());

        let e = EngineError::malformed("feedback_report.v1", "missing field");
        assert!(!e.is_retriable());
    }

    #[test]
    fn test_only_persistence_is_fatal() {
        let e = EngineError::Persistence(rusqlite::Error::InvalidQuery);
        assert!(e.is_fatal());
        assert!(!EngineError::Timeout {
            elapsed_ms: 10,
            budget_ms: 5
        }
        .is_fatal());
        assert!(!EngineError::Validation("bad persona".into()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let e = EngineError::ToolNotFound {
            name: "use_module".into(),
        };
        assert_eq!(e.to_string(), "Tool 'use_module' not found");
        let e = EngineError::Timeout {
            elapsed_ms: 5001,
            budget_ms: 5000,
        };
        assert!(e.is_timeout());
        assert!(e.to_string().contains("5000ms"));
    }
}
