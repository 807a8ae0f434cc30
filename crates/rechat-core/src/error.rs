//! Error types for the streaming core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM HTTP error from {provider} (status {status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the durable step owner should retry after this error.
    ///
    /// Storage and transport failures are transient by contract; LLM
    /// HTTP errors are retryable for rate limiting, timeouts and server
    /// faults but not for client-side mistakes like a bad API key.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmHttp { status, .. } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            Self::Llm(message) => {
                let message = message.to_lowercase();
                message.contains("rate limit")
                    || message.contains("timeout")
                    || message.contains("overloaded")
                    || message.contains("stream error")
            }
            Self::Storage(_) | Self::Http(_) => true,
            Self::Json(_) => false,
        }
    }

    /// Server-requested retry delay, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(error: anyhow::Error) -> Self {
        Self::Storage(error)
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rate_limited = CoreError::LlmHttp {
            provider: "openai".to_string(),
            status: 429,
            message: "slow down".to_string(),
            retry_after_secs: Some(3),
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after_secs(), Some(3));

        let unauthorized = CoreError::LlmHttp {
            provider: "openai".to_string(),
            status: 401,
            message: "bad key".to_string(),
            retry_after_secs: None,
        };
        assert!(!unauthorized.is_retryable());

        assert!(CoreError::Llm("request timeout".to_string()).is_retryable());
        assert!(!CoreError::Llm("bad request".to_string()).is_retryable());
    }
}
