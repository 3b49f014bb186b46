use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GeniusError {
    #[error("planning failed: {0}")]
    Planning(String),

    #[error("generation failed for {target}: {reason}")]
    GenerationFailed { target: String, reason: String },

    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("model endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("model resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("prompt of ~{prompt_tokens} tokens plus {max_tokens} output tokens exceeds context window of {context_window}")]
    ContextLengthExceeded {
        prompt_tokens: usize,
        max_tokens: usize,
        context_window: usize,
    },

    #[error("request cancelled before dispatch")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GeniusError {
    /// Transient faults are absorbed by the scheduler's retry loop; everything
    /// else is surfaced to the caller on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GeniusError::EndpointUnavailable(_) | GeniusError::ResourceExhausted(_)
        )
    }
}

impl From<std::io::Error> for GeniusError {
    fn from(err: std::io::Error) -> Self {
        GeniusError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GeniusError {
    fn from(err: serde_json::Error) -> Self {
        GeniusError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeniusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GeniusError::EndpointUnavailable("down".into()).is_transient());
        assert!(GeniusError::ResourceExhausted("oom".into()).is_transient());
        assert!(!GeniusError::ContextLengthExceeded {
            prompt_tokens: 9000,
            max_tokens: 2048,
            context_window: 8192,
        }
        .is_transient());
        assert!(!GeniusError::Planning("empty features".into()).is_transient());
        assert!(!GeniusError::RequestTimeout(Duration::from_secs(1)).is_transient());
    }
}
