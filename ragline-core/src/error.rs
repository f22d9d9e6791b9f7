//! Error types for the ragline core.
//!
//! Each fallible subsystem gets its own `thiserror` enum, and
//! [`RaglineError`] folds them together for callers that do not care
//! which layer failed.

use std::path::PathBuf;

/// Umbrella error for the ragline core library.
#[derive(Debug, thiserror::Error)]
pub enum RaglineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Chain(#[from] ChainError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures talking to a completion backend.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("authentication failed for {provider}")]
    AuthFailed { provider: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Errors from the conversational pipeline.
///
/// The first stage failure aborts the run and surfaces here with stage
/// context; there is no internal retry.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("completion failed in {stage} stage: {source}")]
    Completion {
        stage: String,
        #[source]
        source: LlmError,
    },

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("graph exceeded step budget ({limit} steps)")]
    BudgetExceeded { limit: usize },

    #[error("malformed pipeline state: {message}")]
    MalformedState { message: String },
}

/// Failures producing embedding vectors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("authentication failed for {provider}")]
    AuthFailed { provider: String },
}

/// Errors from the vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index storage error: {message}")]
    Storage { message: String },

    #[error("corrupt index data: {message}")]
    Corrupted { message: String },
}

/// Errors from retrieval over the vector index.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index search failed: {0}")]
    Index(#[from] IndexError),
}

/// Failures loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// Errors from conversation transports.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel API error: {message}")]
    Api { message: String },

    #[error("channel misconfigured: {message}")]
    Config { message: String },
}

/// Result alias over [`RaglineError`].
pub type Result<T> = std::result::Result<T, RaglineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = RaglineError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_chain() {
        let err = RaglineError::Chain(ChainError::Completion {
            stage: "translate".into(),
            source: LlmError::RateLimited {
                retry_after_secs: 30,
            },
        });
        assert_eq!(
            err.to_string(),
            "Pipeline error: completion failed in translate stage: rate limited, retry after 30s"
        );
    }

    #[test]
    fn test_budget_error_mentions_step_budget() {
        let err = ChainError::BudgetExceeded { limit: 5 };
        assert!(err.to_string().contains("graph exceeded step budget"));
        assert_eq!(err.to_string(), "graph exceeded step budget (5 steps)");
    }

    #[test]
    fn test_error_display_index() {
        let err = RaglineError::Index(IndexError::DimensionMismatch {
            expected: 768,
            actual: 384,
        });
        assert_eq!(
            err.to_string(),
            "Index error: embedding dimension mismatch: expected 768, got 384"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = RaglineError::Config(ConfigError::EnvVarMissing {
            var: "GEMINI_API_KEY".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: environment variable not set: GEMINI_API_KEY"
        );
    }

    #[test]
    fn test_retrieval_error_from_embedding() {
        let err: RetrievalError = EmbeddingError::ApiRequest {
            message: "503".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "query embedding failed: API request failed: 503"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RaglineError = io_err.into();
        assert!(matches!(err, RaglineError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: RaglineError = serde_err.into();
        assert!(matches!(err, RaglineError::Serialization(_)));
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::AuthFailed {
            provider: "Gemini".into(),
        };
        assert_eq!(err.to_string(), "authentication failed for Gemini");

        let err = LlmError::Timeout { timeout_secs: 120 };
        assert_eq!(err.to_string(), "request timed out after 120s");
    }
}
