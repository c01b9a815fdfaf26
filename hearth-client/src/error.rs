//! Crate-level error surface for the client entry points.

use thiserror::Error;

use crate::transport::TransportError;

/// Result alias for client-surface operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by [`crate::campfire::Campfire`] and [`crate::room::Room`]
/// operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The supplied configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No room with the requested name is visible to this account.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// A request to the remote service failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
