//! The per-server RPC surface.

use async_trait::async_trait;

use crate::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, NomadChange, PrepareMessage,
    RollbackMessage, TakeoverMessage,
};

/// Failure to obtain a response from a server.
///
/// This covers transport problems and server-side faults. It never encodes a
/// protocol decision: refusals are expressed as [`AcceptRejectResponse::Reject`].
#[derive(Debug, thiserror::Error)]
pub enum NomadServerError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("server internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// RPC operations exposed by one Nomad server.
///
/// Implementations must serialize these calls: the check-then-act sequence
/// on the fencing token and on the prepared change has to be linearizable.
#[async_trait]
pub trait NomadServer<C: NomadChange>: Send + Sync {
    /// Returns the server's protocol state. Side-effect free.
    async fn discover(&self) -> Result<DiscoverResponse<C>, NomadServerError>;

    /// Validates and stages a change.
    async fn prepare(
        &self,
        message: PrepareMessage<C>,
    ) -> Result<AcceptRejectResponse, NomadServerError>;

    /// Makes the prepared change effective.
    async fn commit(&self, message: CommitMessage)
    -> Result<AcceptRejectResponse, NomadServerError>;

    /// Discards the prepared change.
    async fn rollback(
        &self,
        message: RollbackMessage,
    ) -> Result<AcceptRejectResponse, NomadServerError>;

    /// Takes over mutation rights without touching the prepared change.
    async fn takeover(
        &self,
        message: TakeoverMessage,
    ) -> Result<AcceptRejectResponse, NomadServerError>;
}
