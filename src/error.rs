//! Fleetprof error abstractions.

use axum::http::StatusCode;

/// Application errors which map onto the HTTP surface exposed to recorders and peers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The request payload or parameters failed validation or decoding.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A leader-only operation was invoked on a node which is not the leader.
    #[error("this node is not the current leader")]
    NotLeader,
    /// No leader is currently known to this node.
    #[error("the current leader is unknown")]
    LeaderUnknown,
    /// No non-defunct backend is available for association.
    #[error("no available backend for the given process group")]
    NoBackendAvailable,
    /// The coordination store could not be reached; the request may be retried.
    #[error("the coordination store is currently unavailable")]
    StoreUnavailable,
    /// Any other opaque internal error.
    #[error("internal error: {0}")]
    Ise(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotLeader => StatusCode::MISDIRECTED_REQUEST,
            AppError::LeaderUnknown => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NoBackendAvailable => StatusCode::BAD_REQUEST,
            AppError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Ise(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
