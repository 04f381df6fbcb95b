//! Error types for the Thread Border Router control plane.
//!
//! Mirrors the abstract error kinds of the control plane: validation errors reject
//! a submission outright, while per-action errors are absorbed into the
//! action's terminal status and never propagate out of the queue tick.

use thiserror::Error;

/// Top-level error type for control-plane operations.
#[derive(Error, Debug)]
pub enum BorderRouterError {
    /// Malformed destination, unknown TLV name, or malformed PSK-d.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// `configure`/`start` called while another collector cycle is active,
    /// or the commissioner is in the wrong state for the requested action.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A sub-resource (commissioner, energy scan) is currently owned by
    /// another action.
    #[error("busy: {0}")]
    Busy(String),

    /// The action or collection cycle's deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The action queue is full and nothing evictable, or the Thread API
    /// has no message buffers available.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An action id or collection item id was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A send failed at the Thread API adapter layer.
    #[error("transport failure: {0}")]
    TransportFail(String),

    /// Serialization/deserialization of a request or response body failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BorderRouterError {
    /// Maps this error onto the HTTP status code the action API returns for
    /// a submission failure.
    #[must_use]
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidArgs(_) | Self::InvalidState(_) | Self::Busy(_) => StatusCode::CONFLICT,
            Self::ResourceExhausted(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::TransportFail(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }
}
