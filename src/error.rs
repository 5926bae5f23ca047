use thiserror::Error;

/// Failure taxonomy for the chat core. The gateway maps these to HTTP
/// status codes; nothing in here is transport-specific.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed caller input, rejected before any external call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The durable conversation store is unreachable or erroring.
    /// Never substituted with an empty history.
    #[error("conversation store unavailable: {0}")]
    StorageUnavailable(String),

    /// Agent or memory construction failed (bad template, misconfigured
    /// provider). No cache entry survives this.
    #[error("agent construction failed: {0}")]
    ConstructionFailed(String),

    /// The LLM or a weather call failed mid-query. Not retried here.
    #[error("external call failed: {0}")]
    ExternalCall(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        Self::ConstructionFailed(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalCall(msg.into())
    }
}
