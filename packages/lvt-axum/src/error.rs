//! Error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lvt::{JoinError, RegistryError, StoreError};
use thiserror::Error;

/// Transport-level error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No group identity could be resolved for the request
    #[error("missing group identity")]
    MissingGroup,

    /// The client offered an unsupported WebSocket subprotocol
    #[error("unsupported subprotocol {0:?}")]
    BadSubprotocol(String),

    /// The connection cap was reached
    #[error("connection registry is full")]
    RegistryFull,

    /// The referenced long-poll connection is gone
    #[error("connection is gone")]
    ConnectionGone,

    /// The group's store could not be created
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<JoinError> for TransportError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Registry(RegistryError::Full(_)) => TransportError::RegistryFull,
            JoinError::Store(err) => TransportError::Store(err),
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = match &self {
            TransportError::MissingGroup => StatusCode::BAD_REQUEST,
            TransportError::BadSubprotocol(_) => StatusCode::BAD_REQUEST,
            TransportError::RegistryFull => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::ConnectionGone => StatusCode::GONE,
            TransportError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TransportError>;
