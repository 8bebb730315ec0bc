//! Error taxonomy for clustering runs
//!
//! Per-batch errors (`Transport`, `Format`) are absorbed by the scheduler and
//! turned into run-log entries. Everything else ends the run in `Failed`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Suggested clusters are malformed or irrelevant to the keyword set
    #[error("invalid suggested clusters: {0}")]
    Validation(String),

    /// The LLM call did not succeed (network failure or non-2xx)
    #[error("LLM request failed: {0}")]
    Transport(String),

    /// Model output was not the expected JSON shape
    #[error("unexpected model output: {0}")]
    Format(String),

    #[error("OPENAI_API_KEY not set")]
    MissingCredential,

    #[error("operation not allowed while {0}")]
    InvalidState(&'static str),

    #[error("no keywords to cluster")]
    EmptyInput,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ClusterError {
    /// Errors that only cost one batch its contribution
    pub fn is_batch_local(&self) -> bool {
        matches!(self, ClusterError::Transport(_) | ClusterError::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_local_errors() {
        assert!(ClusterError::Transport("503".into()).is_batch_local());
        assert!(ClusterError::Format("not json".into()).is_batch_local());
        assert!(!ClusterError::MissingCredential.is_batch_local());
        assert!(!ClusterError::Validation("x".into()).is_batch_local());
    }

    #[test]
    fn test_display_messages() {
        let err = ClusterError::InvalidState("idle");
        assert_eq!(err.to_string(), "operation not allowed while idle");
        assert_eq!(ClusterError::MissingCredential.to_string(), "OPENAI_API_KEY not set");
    }
}
