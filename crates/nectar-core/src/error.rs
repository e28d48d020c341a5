// ── Core error types ──
//
// The engine's error taxonomy: validation errors from the contract layer
// and transport failures surface as resource/query errors; cancellation is
// classified and silently discarded as a superseded attempt; a cache-only
// query against an empty cache is a caller contract error and is returned
// to the caller instead of being absorbed.

use thiserror::Error;

use nectar_model::SchemaError;

use crate::endpoint::TransportError;

/// Unified error type for the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Validation failure from the contract layer during parse or
    /// serialize. Fatal for the fetch attempt that produced it.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The transport failed. Retryable via `refetch()`.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The fetch was cancelled or superseded. Never stored as a resource
    /// error.
    #[error("request cancelled")]
    Cancelled,

    /// A `cache-only` query resolved a fingerprint with no cached data.
    #[error("missing cached data for `{endpoint}` at {fingerprint}")]
    MissingCacheData { endpoint: String, fingerprint: String },

    /// A mock handler was registered twice for the same endpoint.
    #[error("endpoint `{0}` is already mocked")]
    EndpointAlreadyMocked(String),

    /// A mocked store was asked to perform an endpoint with no handler.
    #[error("endpoint `{0}` is not mocked")]
    EndpointNotMocked(String),
}

impl CoreError {
    /// Whether this failure is a cancellation signal rather than a real
    /// error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this failure came from the contract layer.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Schema(_))
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            TransportError::Failed(message) => Self::Transport(message),
        }
    }
}
