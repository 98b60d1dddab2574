use thiserror::Error;

/// Input that was rejected but never aborts the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown subscription label '{0}'")]
    UnknownLabel(String),

    #[error("invalid token length: expected 32 characters, got {0}")]
    TokenLength(usize),

    #[error("invalid token format: contains non-alphanumeric characters")]
    TokenFormat,
}
