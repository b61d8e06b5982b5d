//! Error types for the generation status engine

use thiserror::Error;

/// Invalid phase catalog
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("catalog has no phases")]
    Empty,

    #[error("duplicate phase key '{0}'")]
    DuplicatePhaseKey(String),

    #[error("backend step '{0}' is mapped by more than one sub-step")]
    DuplicateBackendStep(String),

    #[error("catalog declares more than one conditional phase ({0} and {1})")]
    MultipleConditional(String, String),

    #[error("phase '{0}' has no sub-steps")]
    NoSubSteps(String),
}

/// Push channel failure; always answered by falling back to polling
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("push channel connect failed: {0}")]
    Connect(String),

    #[error("timed out opening push channel")]
    Timeout,

    #[error("push channel protocol error: {0}")]
    Protocol(String),

    #[error("push channel closed before a terminal event")]
    Closed,
}

/// Payload that could not be turned into a status event
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("payload carries no status fields")]
    Empty,

    #[error("progress {0} is not a finite number")]
    InvalidProgress(f64),
}

/// HTTP-level failure talking to the backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Readiness gate failure surfaced to the gated caller
///
/// Cloneable because one coalesced readiness wait is shared by every caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error("models failed to become ready after {attempts} attempts")]
    ModelsNotReady { attempts: u32 },

    #[error("readiness wait cancelled")]
    Cancelled,

    #[error("readiness probe failed: {0}")]
    Probe(#[from] BackendError),
}
