//! Addressable handle on one server.

use std::fmt;
use std::sync::Arc;

use nomad_types::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, HostPort, NomadChange, NomadServer,
    NomadServerError, PrepareMessage, RollbackMessage, TakeoverMessage,
};

/// A server's RPC surface together with its address.
pub struct NomadEndpoint<C: NomadChange> {
    address: HostPort,
    server: Arc<dyn NomadServer<C>>,
}

impl<C: NomadChange> NomadEndpoint<C> {
    pub fn new(address: HostPort, server: Arc<dyn NomadServer<C>>) -> Self {
        Self { address, server }
    }

    pub fn address(&self) -> &HostPort {
        &self.address
    }

    pub async fn discover(&self) -> Result<DiscoverResponse<C>, NomadServerError> {
        self.server.discover().await
    }

    pub async fn prepare(
        &self,
        message: PrepareMessage<C>,
    ) -> Result<AcceptRejectResponse, NomadServerError> {
        self.server.prepare(message).await
    }

    pub async fn commit(
        &self,
        message: CommitMessage,
    ) -> Result<AcceptRejectResponse, NomadServerError> {
        self.server.commit(message).await
    }

    pub async fn rollback(
        &self,
        message: RollbackMessage,
    ) -> Result<AcceptRejectResponse, NomadServerError> {
        self.server.rollback(message).await
    }

    pub async fn takeover(
        &self,
        message: TakeoverMessage,
    ) -> Result<AcceptRejectResponse, NomadServerError> {
        self.server.takeover(message).await
    }
}

impl<C: NomadChange> Clone for NomadEndpoint<C> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            server: Arc::clone(&self.server),
        }
    }
}

impl<C: NomadChange> fmt::Debug for NomadEndpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NomadEndpoint")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
