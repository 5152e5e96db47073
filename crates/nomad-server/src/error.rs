//! Error types for the Nomad server.

use nomad_types::{ChangeUuid, NomadServerError};

/// Internal failures of a server.
///
/// Protocol refusals are not errors: they are returned to the client as
/// rejections. These variants describe faults of the server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to hash resulting configuration: {0}")]
    Hash(#[from] postcard::Error),

    #[error("failed to apply change {uuid}: {reason}")]
    Apply { uuid: ChangeUuid, reason: String },

    #[error("change {0} is referenced but missing from the change log")]
    MissingChange(ChangeUuid),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl From<ServerError> for NomadServerError {
    fn from(error: ServerError) -> Self {
        NomadServerError::Internal(error.to_string())
    }
}
